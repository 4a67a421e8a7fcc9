//! Client side of the remote CLI
//!
//! [`RemoteCli`] opens a tunnel channel and runs one invocation over it with
//! [`run_session`]; the returned code is the remote command's exit status.

pub mod error;
pub mod session;

pub use error::{ClientError, EXIT_CONNECTION_CLOSED, EXIT_REJECTED};
pub use session::{run_session, SessionOptions, DEFAULT_PING_INTERVAL};

use remcli_tunnel::TunnelClient;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Runs invocations against one server
pub struct RemoteCli {
    tunnel: TunnelClient,
}

impl RemoteCli {
    pub fn new(tunnel: TunnelClient) -> Self {
        Self { tunnel }
    }

    /// Run one command and return its exit code
    ///
    /// A connection that closes before EXIT is an error, never an exit code.
    pub async fn execute<I, O, E>(
        &self,
        options: &SessionOptions,
        stdin: I,
        stdout: O,
        stderr: E,
    ) -> Result<i32, ClientError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let channel = self.tunnel.connect().await?;
        debug!(
            "Connected to {} (session {})",
            self.tunnel.endpoint(),
            channel.session()
        );

        let (reader, writer) = channel.into_split();
        let completion = run_session(reader, writer, options, stdin, stdout, stderr).await;
        Ok(completion.exit_code()?)
    }
}
