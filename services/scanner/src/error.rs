//! services/scanner/src/error.rs

use crate::config::ConfigError;
use attendance_core::ports::PortError;
use attendance_core::sync::SyncError;
use attendance_core::token::TokenError;

/// The primary error type for the `scanner` service.
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    #[error("Token codec error: {0}")]
    Token(#[from] TokenError),

    /// The local queue failed during a sync cycle; capture must stop.
    #[error("Sync stopped: {0}")]
    Sync(#[from] SyncError),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
