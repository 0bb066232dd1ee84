use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{
    BudgetData, BudgetMeta, CategoriesData, Category, CategoryGroup, MonthData, TokenRecord,
};
use crate::progress::{self, LedgerEntry, MonthPosition, Severity, to_units};
use crate::proxy;
use crate::selection::{self, SelectionStore};
use crate::upstream::BudgetApi;

#[derive(Debug, Clone, Serialize)]
pub struct RowView {
    pub category_id: String,
    pub name: String,
    pub budgeted: f64,
    pub available: f64,
    pub spent_amount: f64,
    pub position: MonthPosition,
    pub spent: String,
    pub elapsed: String,
    pub severity: Severity,
    pub css_class: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoiceView {
    pub id: String,
    pub name: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub categories: Vec<ChoiceView>,
}

/// Everything the dashboard page or a live update needs.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub budget_id: String,
    pub budget_name: String,
    pub month: String,
    pub rows: Vec<RowView>,
    pub groups: Vec<GroupView>,
}

/// Resolves the default budget and its visible category groups.
pub async fn budget_meta(api: &dyn BudgetApi, token: &TokenRecord) -> Result<BudgetMeta, AppError> {
    let budget: BudgetData = proxy::forward(api, token, "/budgets/default")
        .await?
        .into_data()?;
    let categories: CategoriesData = proxy::forward(api, token, "/budgets/default/categories")
        .await?
        .into_data()?;

    let category_groups = categories
        .category_groups
        .into_iter()
        .filter(|group| !group.hidden && !group.deleted)
        .map(|group| CategoryGroup {
            id: group.id,
            name: group.name,
            categories: group
                .categories
                .into_iter()
                .filter(|category| !category.hidden && !category.deleted)
                .map(|category| Category {
                    id: category.id,
                    name: category.name,
                })
                .collect(),
        })
        .collect();

    Ok(BudgetMeta {
        user_id: token.user_id.clone(),
        budget_id: budget.budget.id,
        budget_name: budget.budget.name,
        category_groups,
    })
}

/// The month containing `today`, indexed by category id.
pub async fn month_ledger(
    api: &dyn BudgetApi,
    token: &TokenRecord,
    budget_id: &str,
    today: NaiveDate,
) -> Result<HashMap<String, LedgerEntry>, AppError> {
    let path = format!("/budgets/{budget_id}/months/{}", progress::month_key(today));
    let month: MonthData = proxy::forward(api, token, &path).await?.into_data()?;
    let month_start = progress::parse_ledger_month(&month.month.month)?;

    Ok(month
        .month
        .categories
        .into_iter()
        .map(|category| {
            let entry = LedgerEntry {
                category_id: category.id.clone(),
                month: month_start,
                budgeted: category.budgeted,
                activity: category.activity,
                balance: category.balance,
            };
            (category.id, entry)
        })
        .collect())
}

/// Rows follow the selection order; ids without a visible category or a
/// ledger entry are left out.
pub fn build_view(
    meta: &BudgetMeta,
    selection: &[String],
    ledger: &HashMap<String, LedgerEntry>,
    today: NaiveDate,
) -> DashboardView {
    let rows = selection
        .iter()
        .filter_map(|id| {
            let category = meta.category(id)?;
            let entry = ledger.get(id)?;
            let row = progress::compute_row(entry, today);
            Some(RowView {
                category_id: row.category_id.clone(),
                name: category.name.clone(),
                budgeted: to_units(entry.budgeted),
                available: to_units(entry.starting_balance()),
                spent_amount: to_units(-entry.activity),
                position: row.position,
                spent: row.spent_label(),
                elapsed: row.elapsed_label(),
                severity: row.severity,
                css_class: row.severity.css_class(),
            })
        })
        .collect();

    let groups = meta
        .category_groups
        .iter()
        .filter(|group| !group.categories.is_empty())
        .map(|group| GroupView {
            id: group.id.clone(),
            name: group.name.clone(),
            categories: group
                .categories
                .iter()
                .map(|category| ChoiceView {
                    id: category.id.clone(),
                    name: category.name.clone(),
                    selected: selection.contains(&category.id),
                })
                .collect(),
        })
        .collect();

    DashboardView {
        budget_id: meta.budget_id.clone(),
        budget_name: meta.budget_name.clone(),
        month: today.format("%B %Y").to_string(),
        rows,
        groups,
    }
}

/// Re-reads the selection, re-fetches the month and recomputes every row.
pub async fn render_view(
    api: &dyn BudgetApi,
    selections: &SelectionStore,
    token: &TokenRecord,
    meta: &BudgetMeta,
    today: NaiveDate,
) -> Result<DashboardView, AppError> {
    let key = selection::storage_key(&meta.user_id, &meta.budget_id);
    let selected = selections.current_selection(&key)?;
    let ledger = month_ledger(api, token, &meta.budget_id, today).await?;
    Ok(build_view(meta, &selected, &ledger, today))
}
