//! Spend-versus-time computation for one category in one month.
//!
//! Everything here is pure: the same entry and the same `today` always give the
//! same row.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

use crate::error::AppError;

/// Upstream amounts are integer milliunits.
pub const MILLIUNITS_PER_UNIT: f64 = 1000.0;

pub fn to_units(milliunits: i64) -> f64 {
    milliunits as f64 / MILLIUNITS_PER_UNIT
}

/// One category's figures for one month, in milliunits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub category_id: String,
    /// First day of the month the figures belong to.
    pub month: NaiveDate,
    pub budgeted: i64,
    pub activity: i64,
    pub balance: i64,
}

impl LedgerEntry {
    /// Balance on the first of the month, before any activity.
    pub fn starting_balance(&self) -> i64 {
        self.balance - self.activity
    }

    /// `None` when nothing was available to spend.
    pub fn spent_fraction(&self) -> Option<f64> {
        let starting = self.starting_balance();
        if starting == 0 {
            return None;
        }
        Some(-(self.activity as f64) / starting as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthPosition {
    Past,
    Current,
    Future,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    AheadOfPace,
    Overspent,
    NotBudgeted,
}

impl Severity {
    pub fn classify(spent: Option<f64>, elapsed: f64) -> Self {
        match spent {
            None => Severity::NotBudgeted,
            Some(spent) if spent > 1.0 => Severity::Overspent,
            Some(spent) if spent > elapsed => Severity::AheadOfPace,
            Some(_) => Severity::Normal,
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Severity::Normal => "",
            Severity::AheadOfPace => "bg-warning",
            Severity::Overspent => "bg-danger text-light",
            Severity::NotBudgeted => "table-light",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRow {
    pub category_id: String,
    pub position: MonthPosition,
    pub elapsed: f64,
    pub spent: Option<f64>,
    pub severity: Severity,
}

impl ProgressRow {
    pub fn spent_label(&self) -> String {
        match self.spent {
            Some(spent) => percent_label(spent),
            None => "(Not budgeted)".to_string(),
        }
    }

    pub fn elapsed_label(&self) -> String {
        percent_label(self.elapsed)
    }
}

fn percent_label(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map_or(31, |last| last.day())
}

/// Day 1 is 0, the last day is 1; whole months before or after `today` are 1 or 0.
pub fn elapsed_fraction(month: NaiveDate, today: NaiveDate) -> (MonthPosition, f64) {
    let month = first_of_month(month);
    let month_first = first_of_month(today);
    if month < month_first {
        return (MonthPosition::Past, 1.0);
    }
    if month > month_first {
        return (MonthPosition::Future, 0.0);
    }
    let days = days_in_month(today);
    let elapsed = f64::from(today.day() - 1) / f64::from(days - 1);
    (MonthPosition::Current, elapsed)
}

pub fn compute_row(entry: &LedgerEntry, today: NaiveDate) -> ProgressRow {
    let (position, elapsed) = elapsed_fraction(entry.month, today);
    let spent = entry.spent_fraction();
    ProgressRow {
        category_id: entry.category_id.clone(),
        position,
        elapsed,
        spent,
        severity: Severity::classify(spent, elapsed),
    }
}

/// Parses the upstream `YYYY-MM-01` month key.
pub fn parse_ledger_month(value: &str) -> Result<NaiveDate, AppError> {
    let malformed = || AppError::MalformedLedgerMonth(value.to_string());
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return Err(malformed());
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| malformed())?;
    if date.day() != 1 {
        return Err(malformed());
    }
    Ok(date)
}

/// Path segment the upstream expects for the month containing `today`.
pub fn month_key(today: NaiveDate) -> String {
    first_of_month(today).format("%Y-%m-%d").to_string()
}
