//! Error taxonomy shared by the session core
//!
//! Every fallible operation in the core returns [`Result`]; the orchestrator
//! is the single place that decides whether a failure re-arms the session
//! or ends it.

use thiserror::Error;

/// Result type alias for session core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// No active or compatible provider; raised before any network call
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, non-2xx status or malformed whole-response payload
    #[error("transport error: {0}")]
    Transport(String),

    /// Speech recognition failure (no-match, timeout, busy, permissions)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Both synthesis backends failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Output device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a configuration error
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether this is a transport error
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("malformed payload: {err}"))
    }
}
