use serde::{Deserialize, Serialize};

/// OAuth credential held server-side for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub issued_at: i64,
    pub user_id: String,
}

impl TokenRecord {
    pub fn expires_at(&self) -> i64 {
        self.issued_at.saturating_add(self.expires_in)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }
}

/// Token endpoint response for `grant_type=authorization_code`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub created_at: i64,
}

/// Every upstream payload is wrapped in `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    pub user: UpstreamUser,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamUser {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct BudgetData {
    pub budget: BudgetSummary,
}

#[derive(Debug, Deserialize)]
pub struct BudgetSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CategoriesData {
    pub category_groups: Vec<UpstreamCategoryGroup>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamCategoryGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub categories: Vec<UpstreamCategory>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct MonthData {
    pub month: MonthDetail,
}

#[derive(Debug, Deserialize)]
pub struct MonthDetail {
    pub month: String,
    #[serde(default)]
    pub categories: Vec<MonthCategory>,
}

/// Ledger figures in milliunits.
#[derive(Debug, Deserialize)]
pub struct MonthCategory {
    pub id: String,
    pub budgeted: i64,
    pub activity: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryGroup {
    pub id: String,
    pub name: String,
    pub categories: Vec<Category>,
}

/// What a view needs to know about the budget before it can ask for a month.
#[derive(Debug, Clone)]
pub struct BudgetMeta {
    pub user_id: String,
    pub budget_id: String,
    pub budget_name: String,
    pub category_groups: Vec<CategoryGroup>,
}

impl BudgetMeta {
    pub fn category(&self, id: &str) -> Option<&Category> {
        self.category_groups
            .iter()
            .flat_map(|group| group.categories.iter())
            .find(|category| category.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_window() {
        let record = TokenRecord {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 7200,
            issued_at: 1_700_000_000,
            user_id: "u".into(),
        };
        assert_eq!(record.expires_at(), 1_700_007_200);
        assert!(!record.is_expired(1_700_007_199));
        assert!(record.is_expired(1_700_007_200));
    }

    #[test]
    fn month_payload_parses() {
        let body = r#"{"data":{"month":{"month":"2026-10-01","note":null,"categories":[
            {"id":"c1","name":"Groceries","budgeted":50000,"activity":-12000,"balance":38000,"hidden":false}
        ]}}}"#;
        let parsed: Envelope<MonthData> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.month.month, "2026-10-01");
        assert_eq!(parsed.data.month.categories[0].activity, -12000);
    }
}
