//! Error handling for the dev server.
//!
//! `DevError` is the top-level type returned by servers, runners and the
//! build event coordinator. Configuration problems are reported through
//! `ConfigError`, which always carries a hint telling the user what to change.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level dev server error type.
#[derive(Debug, Error, Diagnostic)]
pub enum DevError {
    /// Invalid or unloadable dev options
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Update computation or source resolution failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Hmr(#[from] fob_hmr::HmrError),

    /// A server could not bind or stopped unexpectedly
    #[error("Server error: {0}")]
    Server(String),

    /// The Node worker could not be started or talked to
    #[error("Worker error: {0}")]
    Worker(String),

    /// No Node-targeted JS entry bundle exists for the worker to run
    #[error("No Node entry bundle found")]
    #[diagnostic(help("The build must emit a JS entry bundle targeting Node to run a worker"))]
    NoWorkerEntry,

    /// I/O errors from file system and process operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Missing required configuration field
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: String,
        /// Helpful hint for providing the field
        hint: String,
    },

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },
}

/// Result type alias using `DevError` as the default error type.
pub type Result<T, E = DevError> = std::result::Result<T, E>;
