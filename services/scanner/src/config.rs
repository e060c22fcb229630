//! services/scanner/src/config.rs
//!
//! Scanner configuration, loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::path::PathBuf;
use std::time::Duration;

use attendance_core::sync::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SYNC_INTERVAL};
use attendance_core::token::DEFAULT_KDF_LOG_N;
use tracing::Level;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: String,
    pub queue_path: PathBuf,
    pub log_level: Level,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    /// Identity used when a token carries no student.
    pub operator_id: Option<String>,
    /// Present on designated decode authorities only.
    pub token_secret: Option<String>,
    pub token_kdf_log_n: u8,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("queue_path", &self.queue_path)
            .field("log_level", &self.log_level)
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .field("probe_interval", &self.probe_interval)
            .field("operator_id", &self.operator_id)
            .field("decode_authority", &self.token_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base_url = required("API_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let api_token = required("API_TOKEN")?;

        let queue_path = std::env::var("QUEUE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./scanner-queue.db"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let sync_interval = seconds("SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL)?;
        let request_timeout = seconds("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?;
        let probe_interval = seconds("PROBE_INTERVAL_SECS", Duration::from_secs(3))?;

        let operator_id = optional("OPERATOR_ID");
        let token_secret = optional("TOKEN_SECRET");

        let token_kdf_log_n = match std::env::var("TOKEN_KDF_LOG_N") {
            Ok(raw) => raw.parse::<u8>().map_err(|e| {
                ConfigError::InvalidValue("TOKEN_KDF_LOG_N".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_KDF_LOG_N,
        };

        Ok(Self {
            api_base_url,
            api_token,
            queue_path,
            log_level,
            sync_interval,
            request_timeout,
            probe_interval,
            operator_id,
            token_secret,
            token_kdf_log_n,
        })
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn seconds(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    name.to_string(),
                    format!("'{}' is not a positive number of seconds", raw),
                )
            }),
        Err(_) => Ok(default),
    }
}
