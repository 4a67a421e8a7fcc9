use remcli_proto::ProtocolError;
use remcli_tunnel::TunnelError;
use thiserror::Error;

/// Exit status when the server rejected the connection
pub const EXIT_REJECTED: i32 = 15;

/// Exit status when the connection closed without an EXIT frame
pub const EXIT_CONNECTION_CLOSED: i32 = 255;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Process exit status to report for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Tunnel(e) if e.is_rejection() => EXIT_REJECTED,
            _ => EXIT_CONNECTION_CLOSED,
        }
    }
}
