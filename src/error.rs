//! Error types for httpsh

use std::io;

use thiserror::Error;

/// Result type alias for httpsh
pub type Result<T> = std::result::Result<T, Error>;

/// Startup, issuance and shutdown errors.
///
/// Per-request failures never become an [`Error`]; they are
/// [`Rejection`](crate::gateway::Rejection)s answered inside the handler.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key generation, signing or encoding failure
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// TLS setup or verification failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Server did not stop cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an IO error with the path it concerns.
    pub fn file(path: impl AsRef<std::path::Path>, source: &io::Error) -> Self {
        Self::Config(format!("Cannot access '{}': {source}", path.as_ref().display()))
    }
}
