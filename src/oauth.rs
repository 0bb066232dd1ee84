use log::{info, warn};

use crate::error::AppError;
use crate::models::{TokenRecord, UserData};
use crate::upstream::BudgetApi;

/// Trades a one-time authorization code for a complete token record.
///
/// The record is only handed back once the upstream user behind the new token
/// has been resolved; any failure along the way is an `AuthExchange` error and
/// leaves nothing half-built for the caller to store.
pub async fn exchange(api: &dyn BudgetApi, code: &str) -> Result<TokenRecord, AppError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::AuthExchange("missing authorization code".into()));
    }

    let grant = api.exchange_code(code).await?;

    let user: UserData = api
        .get(&grant.access_token, "/user")
        .await
        .and_then(|response| response.into_data())
        .map_err(|err| {
            warn!("token issued but user lookup failed: {err}");
            AppError::AuthExchange(format!("user lookup failed: {err}"))
        })?;

    info!("authorization code exchanged for upstream user {}", user.user.id);
    Ok(TokenRecord {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_in: grant.expires_in,
        issued_at: grant.created_at,
        user_id: user.user.id,
    })
}
