use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket_dyn_templates::Template;
use thiserror::Error;

/// Every failure a request can end in.
#[derive(Debug, Error)]
pub enum AppError {
    /// The token endpoint (or the follow-up user lookup) refused the login.
    /// The detail is for the log only.
    #[error("Login could not be completed. Please start again.")]
    AuthExchange(String),
    #[error("{detail}")]
    UpstreamProxy { status: u16, detail: String },
    #[error("Please log in.")]
    Unauthenticated,
    #[error("Unexpected month format: {0}")]
    MalformedLedgerMonth(String),
    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Session store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("Session store unavailable: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Unreadable upstream payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AppError {
    pub fn status(&self) -> Status {
        match self {
            AppError::AuthExchange(_) => Status::BadGateway,
            AppError::UpstreamProxy { status, .. } => Status::new(*status),
            AppError::Unauthenticated => Status::Unauthorized,
            AppError::MalformedLedgerMonth(_) | AppError::Transport(_) | AppError::Payload(_) => {
                Status::BadGateway
            }
            AppError::Store(_) | AppError::Pool(_) | AppError::Config(_) => {
                Status::InternalServerError
            }
        }
    }
}

pub fn render_error(message: &str) -> Template {
    Template::render(
        "error",
        serde_json::json!({
            "message": message,
        }),
    )
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        (self.status(), render_error(&self.to_string())).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_exchange_hides_upstream_detail() {
        let err = AppError::AuthExchange("invalid_grant: code already used".into());
        assert!(!err.to_string().contains("invalid_grant"));
        assert_eq!(err.status(), Status::BadGateway);
    }

    #[test]
    fn upstream_status_is_kept() {
        let err = AppError::UpstreamProxy {
            status: 429,
            detail: "Too many requests".into(),
        };
        assert_eq!(err.status().code, 429);
        assert_eq!(err.to_string(), "Too many requests");
    }
}
