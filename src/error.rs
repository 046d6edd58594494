//! Typed failures returned by a [`PlatformClient`](crate::platform::PlatformClient).
//!
//! Callers decide per variant whether a failure is recoverable (a mention
//! that does not resolve, a blob that fails to download) or fatal (a channel
//! that cannot be joined).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("{operation} is not available to a {mode} client")]
    Unsupported {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PlatformError::Protocol(err.to_string())
        } else {
            PlatformError::Transport(err.to_string())
        }
    }
}
