//! services/api/src/config.rs
//!
//! Defines the server's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;

use attendance_core::ingestion::DEFAULT_DEDUP_WINDOW_SECS;
use attendance_core::token::DEFAULT_KDF_LOG_N;
use tracing::Level;

/// One day.
const MAX_DEDUP_WINDOW_SECS: i64 = 86_400;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub token_secret: String,
    pub dedup_window_secs: i64,
    pub token_kdf_log_n: u8,
    pub cors_origin: String,
}

// The secret stays out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("log_level", &self.log_level)
            .field("dedup_window_secs", &self.dedup_window_secs)
            .field("token_kdf_log_n", &self.token_kdf_log_n)
            .field("cors_origin", &self.cors_origin)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Sync Engine Settings ---
        let token_secret = std::env::var("TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("TOKEN_SECRET".to_string()))?;

        let dedup_window_secs = match std::env::var("DEDUP_WINDOW_SECS") {
            Ok(raw) => parse_dedup_window(&raw)?,
            Err(_) => DEFAULT_DEDUP_WINDOW_SECS,
        };

        let token_kdf_log_n = match std::env::var("TOKEN_KDF_LOG_N") {
            Ok(raw) => raw.parse::<u8>().map_err(|e| {
                ConfigError::InvalidValue("TOKEN_KDF_LOG_N".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_KDF_LOG_N,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            token_secret,
            dedup_window_secs,
            token_kdf_log_n,
            cors_origin,
        })
    }
}

fn parse_dedup_window(raw: &str) -> Result<i64, ConfigError> {
    raw.parse::<i64>()
        .ok()
        .filter(|secs| (1..=MAX_DEDUP_WINDOW_SECS).contains(secs))
        .ok_or_else(|| {
            ConfigError::InvalidValue(
                "DEDUP_WINDOW_SECS".to_string(),
                format!(
                    "'{}' is not a number of seconds between 1 and {}",
                    raw, MAX_DEDUP_WINDOW_SECS
                ),
            )
        })
}
