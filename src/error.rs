//! Error types for the page helpers
//!
//! The watchers themselves never fail; these errors cover configuration and
//! the browser-facing surfaces.

use thiserror::Error;

/// Result type alias for fallible operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the watchers
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to start the browser backend
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to evaluate an injected helper
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file or helper result was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
