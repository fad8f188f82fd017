//! Error types shared across the NVD ETL crates

use thiserror::Error;

/// Result type alias for common utilities
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error type for the shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid {setting} value '{value}'")]
    InvalidSetting { setting: &'static str, value: String },

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}
