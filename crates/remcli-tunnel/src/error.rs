use crate::registry::{SessionId, Side};
use thiserror::Error;

/// Session registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session {session} already has a {side} leg")]
    DuplicateLeg { session: SessionId, side: Side },

    #[error("Session {session} legs authenticated as different principals")]
    PrincipalMismatch { session: SessionId },
}

/// Client-side tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Server rejected connection ({status}): {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl TunnelError {
    /// Errors raised before the channel was established
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TunnelError::Unauthorized { .. }
                | TunnelError::HttpStatus { .. }
                | TunnelError::Handshake(_)
        )
    }
}
