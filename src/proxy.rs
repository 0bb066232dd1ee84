use chrono::Utc;
use log::{debug, warn};
use rocket::http::{Header, Status};
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde_json::json;

use crate::error::AppError;
use crate::models::TokenRecord;
use crate::session::Session;
use crate::upstream::{BudgetApi, RATE_LIMIT_HEADER, UpstreamResponse};

/// One upstream call under the session's bearer token.
///
/// The response comes back whatever its status; callers that want typed data
/// use `UpstreamResponse::into_data`. Expired tokens are forwarded as-is and
/// the upstream decides.
pub async fn forward(
    api: &dyn BudgetApi,
    token: &TokenRecord,
    path_and_query: &str,
) -> Result<UpstreamResponse, AppError> {
    if token.is_expired(Utc::now().timestamp()) {
        warn!(
            "forwarding {path_and_query} with a token that expired at {}",
            token.expires_at()
        );
    }
    let response = api.get(&token.access_token, path_and_query).await?;
    if response.is_success() {
        debug!("proxied {path_and_query} -> {}", response.status);
    } else {
        warn!(
            "upstream answered {path_and_query} with {}: {}",
            response.status,
            response.error_detail().unwrap_or("no detail")
        );
    }
    Ok(response)
}

/// Session-level entry point: no token record means no upstream call.
pub async fn proxy(
    api: &dyn BudgetApi,
    session: &Session,
    path_and_query: &str,
) -> Result<UpstreamResponse, AppError> {
    let token = session.require_token()?;
    forward(api, token, path_and_query).await
}

/// `/api/<path..>` plus the raw query string, as the upstream path.
pub fn upstream_path(segments: &[&str], query: Option<&str>) -> String {
    let mut path = format!("/{}", segments.join("/"));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }
    path
}

impl<'r> Responder<'r, 'static> for UpstreamResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let mut response = Json(self.body).respond_to(req)?;
        response.set_status(Status::new(self.status));
        if let Some(limit) = self.rate_limit {
            response.set_header(Header::new(RATE_LIMIT_HEADER, limit));
        }
        response.set_header(Header::new("Vary", "Authorization"));
        Ok(response)
    }
}

/// JSON failure for `/api/*`, shaped like the upstream's own error envelope.
#[derive(Debug)]
pub struct ApiFailure(pub AppError);

impl From<AppError> for ApiFailure {
    fn from(err: AppError) -> Self {
        ApiFailure(err)
    }
}

impl<'r> Responder<'r, 'static> for ApiFailure {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.0.status();
        let name = match &self.0 {
            AppError::Unauthenticated => "unauthenticated",
            _ => "proxy_error",
        };
        let body = json!({
            "error": {
                "id": status.code.to_string(),
                "name": name,
                "detail": self.0.to_string(),
            }
        });
        let mut response = Json(body).respond_to(req)?;
        response.set_status(status);
        response.set_header(Header::new("Vary", "Authorization"));
        Ok(response)
    }
}
