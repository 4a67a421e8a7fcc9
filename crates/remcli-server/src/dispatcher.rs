//! Hand-off point between the protocol and whatever implements commands

use async_trait::async_trait;
use remcli_auth::Principal;
use remcli_proto::Invocation;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Exit code for usage problems and unknown commands
pub const EXIT_USAGE: i32 = 2;

/// Exit code for commands that failed while running
pub const EXIT_FAILURE: i32 = 1;

/// Standard streams of one running command
///
/// Dropping `stdout` and `stderr` ends the corresponding frame streams.
pub struct CommandIo {
    pub stdin: Pin<Box<dyn AsyncRead + Send>>,
    pub stdout: Pin<Box<dyn AsyncWrite + Send>>,
    pub stderr: Pin<Box<dyn AsyncWrite + Send>>,
}

/// What the dispatcher is asked to run
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub invocation: Invocation,
    /// Identity the tunnel authenticated the connection as
    pub principal: Principal,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No such command {0}")]
    NoSuchCommand(String),

    #[error("{0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::NoSuchCommand(_) | DispatchError::Usage(_) => EXIT_USAGE,
            DispatchError::Io(_) | DispatchError::Failed(_) => EXIT_FAILURE,
        }
    }
}

/// Resolves an invocation to a command and runs it to completion
#[async_trait]
pub trait CommandDispatcher: Send + Sync + 'static {
    /// Run the command; the returned code is sent to the client verbatim
    async fn dispatch(&self, context: CommandContext, io: CommandIo) -> Result<i32, DispatchError>;
}
