//! Error types for the roadbook gate.

use thiserror::Error;

/// Main error type for gate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reading or merging configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
