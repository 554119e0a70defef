use std::path::PathBuf;

use thiserror::Error;

/// Lamina error types
#[derive(Error, Debug)]
pub enum LaminaError {
    /// Path missing, unreadable, or metadata inaccessible during hashing
    #[error("Hash error for {path}: {message}")]
    HashError { path: PathBuf, message: String },

    /// Filesystem walk or tar emission failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Base-image resolution, environment substitution, or wildcard
    /// expansion failed during dependency analysis
    #[error("Analysis error: {0}")]
    AnalysisError(String),

    /// API misuse, e.g. recording a file before any layer is open
    #[error("State error: {0}")]
    StateError(String),

    /// Build-script parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for LaminaError {
    fn from(err: serde_json::Error) -> Self {
        LaminaError::SerializationError(err.to_string())
    }
}

/// Result type alias for lamina operations
pub type Result<T> = std::result::Result<T, LaminaError>;
