//! Error types for rarexsec

use thiserror::Error;

/// rarexsec error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parquet read/write error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow conversion error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or mistyped column
    #[error("Column error: {0}")]
    Column(String),

    /// Expression parse or evaluation error
    #[error("Expression error: {0}")]
    Expression(String),

    /// Lookup miss (registry key, catalogue entry, archive tree)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
