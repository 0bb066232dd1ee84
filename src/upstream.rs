use std::sync::Arc;

use log::warn;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{Envelope, TokenGrant};

pub const RATE_LIMIT_HEADER: &str = "X-Rate-Limit";

pub type SharedApi = Arc<dyn BudgetApi>;

/// A response from the budgeting API, kept as close to the wire as the proxy needs.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub rate_limit: Option<String>,
    pub body: Value,
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

impl UpstreamResponse {
    /// Builds a response from raw bytes. A body that is not JSON keeps the
    /// upstream status (502 if that status claimed success) under a
    /// synthesized error envelope.
    pub fn from_wire(status: u16, rate_limit: Option<String>, bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(body) => Self {
                status,
                rate_limit,
                body,
            },
            Err(err) => {
                warn!("upstream answered {status} with a body that is not JSON: {err}");
                let forwarded = if is_success_status(status) { 502 } else { status };
                Self {
                    status: forwarded,
                    rate_limit,
                    body: json!({
                        "error": {
                            "id": forwarded.to_string(),
                            "name": "unreadable_response",
                            "detail": format!("Upstream responded with status {status}"),
                        }
                    }),
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }

    /// `error.detail` from the upstream error envelope, if any.
    pub fn error_detail(&self) -> Option<&str> {
        self.body.pointer("/error/detail").and_then(Value::as_str)
    }

    /// Unwraps `{"data": ...}`, turning a non-success status into `UpstreamProxy`.
    /// An error body under a success status is reported as 502.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, AppError> {
        if !self.is_success() || self.body.get("error").is_some() {
            let detail = self
                .error_detail()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("Upstream responded with status {}", self.status));
            let status = if self.is_success() { 502 } else { self.status };
            return Err(AppError::UpstreamProxy { status, detail });
        }
        let envelope: Envelope<T> = serde_json::from_value(self.body)?;
        Ok(envelope.data)
    }
}

/// The two things this app ever asks of the budgeting service.
#[rocket::async_trait]
pub trait BudgetApi: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AppError>;

    /// `GET {api_base}{path_and_query}` under the given bearer token.
    async fn get(&self, access_token: &str, path_and_query: &str) -> Result<UpstreamResponse, AppError>;
}

pub struct HttpBudgetApi {
    client: Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl HttpBudgetApi {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
        }
    }
}

#[rocket::async_trait]
impl BudgetApi for HttpBudgetApi {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AppError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|err| {
                AppError::AuthExchange(format!("token endpoint unreachable: {}", err.without_url()))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::AuthExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|err| {
                AppError::AuthExchange(format!("unreadable token response: {}", err.without_url()))
            })
    }

    async fn get(&self, access_token: &str, path_and_query: &str) -> Result<UpstreamResponse, AppError> {
        let url = format!("{}{}", self.api_base, path_and_query);
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        let rate_limit = response
            .headers()
            .get(RATE_LIMIT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?;
        Ok(UpstreamResponse::from_wire(status, rate_limit, &bytes))
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::test_config;
    use crate::models::UserData;

    #[test]
    fn into_data_unwraps_envelope() {
        let response = UpstreamResponse {
            status: 200,
            rate_limit: None,
            body: json!({"data": {"user": {"id": "u-1"}}}),
        };
        let data: UserData = response.into_data().unwrap();
        assert_eq!(data.user.id, "u-1");
    }

    #[test]
    fn into_data_surfaces_upstream_error() {
        let response = UpstreamResponse {
            status: 401,
            rate_limit: None,
            body: json!({"error": {"id": "401", "name": "unauthorized", "detail": "Unauthorized"}}),
        };
        match response.into_data::<UserData>() {
            Err(AppError::UpstreamProxy { status, detail }) => {
                assert_eq!(status, 401);
                assert_eq!(detail, "Unauthorized");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn into_data_falls_back_to_status_text() {
        let response = UpstreamResponse {
            status: 503,
            rate_limit: None,
            body: json!({}),
        };
        let err = response.into_data::<UserData>().unwrap_err();
        assert_eq!(err.to_string(), "Upstream responded with status 503");
    }

    #[test]
    fn error_body_under_success_status_is_bad_gateway() {
        let response = UpstreamResponse {
            status: 200,
            rate_limit: None,
            body: json!({"error": {"id": "500", "name": "internal", "detail": "Broken"}}),
        };
        match response.into_data::<UserData>() {
            Err(err @ AppError::UpstreamProxy { .. }) => {
                assert_eq!(err.status().code, 502);
                assert_eq!(err.to_string(), "Broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_failure_keeps_upstream_status() {
        let response = UpstreamResponse::from_wire(
            503,
            Some("3/200".into()),
            b"<html><body>Service Unavailable</body></html>",
        );
        assert_eq!(response.status, 503);
        assert_eq!(response.rate_limit.as_deref(), Some("3/200"));
        assert_eq!(response.error_detail(), Some("Upstream responded with status 503"));

        let err = response.into_data::<UserData>().unwrap_err();
        assert_eq!(err.status().code, 503);
    }

    #[test]
    fn non_json_success_becomes_bad_gateway() {
        let response = UpstreamResponse::from_wire(200, None, b"not json");
        assert_eq!(response.status, 502);
        assert!(!response.is_success());
    }

    #[test]
    fn json_body_is_kept_verbatim() {
        let response = UpstreamResponse::from_wire(404, None, br#"{"error":{"detail":"Nope"}}"#);
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"error": {"detail": "Nope"}}));
    }

    #[rocket::async_test]
    async fn failed_exchange_never_reports_credentials() {
        let mut config = test_config(std::path::Path::new("data"));
        config.oauth_base = "http://127.0.0.1:1".into();
        let api = HttpBudgetApi::new(&config);

        let detail = match api.exchange_code("code-4711").await {
            Err(AppError::AuthExchange(detail)) => detail,
            other => panic!("unexpected {other:?}"),
        };
        assert!(detail.starts_with("token endpoint unreachable"));
        assert!(!detail.contains(&config.client_secret));
        assert!(!detail.contains("code-4711"));
        assert!(!detail.contains("127.0.0.1"));
    }
}
