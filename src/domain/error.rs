//! Error taxonomy for the synchronization engine.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid block range: start {start} is greater than end {end}")]
    InvalidRange { start: u64, end: u64 },
}

impl AppError {
    /// Fatal errors put the loop on the long cooldown instead of the short one.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Explorer(ExplorerError::Fatal(_)) | Self::Config(_))
    }
}

/// Errors talking to the ledger explorer API
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Fatal explorer error: {0}")]
    Fatal(String),
}

/// Errors reading or writing the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store file {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

/// Errors in environment-derived configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
