//! Server side of the remote CLI
//!
//! [`CliConnectionHandler`] plugs into the tunnel: every bound channel runs
//! one invocation through [`run_connection`], which hands the resolved
//! command to a [`CommandDispatcher`] and relays its output and exit code.

pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod runner;

pub use builtin::BuiltinCommands;
pub use dispatcher::{
    CommandContext, CommandDispatcher, CommandIo, DispatchError, EXIT_FAILURE, EXIT_USAGE,
};
pub use error::ServerError;
pub use handler::CliConnectionHandler;
pub use runner::{run_connection, RunOutcome, RunnerConfig};
