use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use reqwest::Url;
use rocket::figment::Figment;
use rocket::figment::providers::Serialized;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const SECRETS_FILE: &str = "secrets.json";

fn default_api_base() -> String {
    "https://api.youneedabudget.com/v1".to_string()
}

fn default_oauth_base() -> String {
    "https://app.youneedabudget.com".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_refresh_interval_secs() -> u64 {
    15 * 60
}

fn default_session_max_age_days() -> i64 {
    365
}

/// Application settings, extracted from the same figment Rocket reads.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_oauth_base")]
    pub oauth_base: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_session_max_age_days")]
    pub session_max_age_days: i64,
}

/// OAuth client credentials as kept in `secrets.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
struct Secrets {
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

fn read_secrets(path: &Path) -> Option<Secrets> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(secrets) => Some(secrets),
        Err(err) => {
            warn!("ignoring unreadable {}: {err}", path.display());
            None
        }
    }
}

/// Rocket's figment (Rocket.toml, ROCKET_* env) joined with `secrets.json`.
/// Values already set through Rocket's sources win over the file.
pub fn figment() -> Figment {
    let figment = rocket::Config::figment();
    match read_secrets(Path::new(SECRETS_FILE)) {
        Some(secrets) => figment.join(Serialized::defaults(secrets)),
        None => figment,
    }
}

impl AppConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, AppError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|err| AppError::Config(err.to_string()))?;
        config.authorize_url()?;
        Ok(config)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.oauth_base.trim_end_matches('/'))
    }

    /// Where the login button sends the browser.
    pub fn authorize_url(&self) -> Result<Url, AppError> {
        let base = format!("{}/oauth/authorize", self.oauth_base.trim_end_matches('/'));
        Url::parse_with_params(
            &base,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", "read-only"),
            ],
        )
        .map_err(|err| AppError::Config(format!("oauth_base {}: {err}", self.oauth_base)))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("budget_pace.sqlite")
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: &Path) -> AppConfig {
    AppConfig {
        client_id: "client-123".into(),
        client_secret: "shh".into(),
        redirect_url: "http://localhost:8123/callback".into(),
        api_base: default_api_base(),
        oauth_base: default_oauth_base(),
        data_dir: data_dir.to_path_buf(),
        refresh_interval_secs: default_refresh_interval_secs(),
        session_max_age_days: default_session_max_age_days(),
    }
}
