//! Initiator-side handling of command output

use crate::protocol::{CloseReason, InitiatorHandler, ProtocolError};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::debug;

/// How a command invocation ended, from the initiator's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The responder reported an exit code
    Exited(i32),
    /// The connection closed before any exit code arrived
    Closed(CloseReason),
}

impl Completion {
    pub fn exit_code(&self) -> Result<i32, ProtocolError> {
        match self {
            Completion::Exited(code) => Ok(*code),
            Completion::Closed(reason) => Err(ProtocolError::ConnectionClosed(reason.clone())),
        }
    }
}

/// [`InitiatorHandler`] that copies output into two sinks and reports completion
pub struct InitiatorSession<O, E> {
    stdout: O,
    stderr: E,
    done: Option<oneshot::Sender<Completion>>,
}

impl<O, E> InitiatorSession<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    /// Create a session and the receiver resolved on EXIT or connection close
    pub fn new(stdout: O, stderr: E) -> (Self, oneshot::Receiver<Completion>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                stdout,
                stderr,
                done: Some(done),
            },
            rx,
        )
    }

    pub fn into_inner(self) -> (O, E) {
        (self.stdout, self.stderr)
    }

    fn complete(&mut self, completion: Completion) {
        if let Some(done) = self.done.take() {
            let _ = done.send(completion);
        }
    }
}

#[async_trait]
impl<O, E> InitiatorHandler for InitiatorSession<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    async fn on_stdout(&mut self, chunk: Bytes) -> io::Result<()> {
        self.stdout.write_all(&chunk).await?;
        self.stdout.flush().await
    }

    async fn on_stderr(&mut self, chunk: Bytes) -> io::Result<()> {
        self.stderr.write_all(&chunk).await?;
        self.stderr.flush().await
    }

    async fn on_exit(&mut self, code: i32) {
        debug!("command exited with {}", code);
        let _ = self.stdout.flush().await;
        let _ = self.stderr.flush().await;
        self.complete(Completion::Exited(code));
    }

    async fn handle_close(&mut self, reason: CloseReason) {
        let _ = self.stdout.flush().await;
        let _ = self.stderr.flush().await;
        self.complete(Completion::Closed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_wins_over_close() {
        let (mut session, mut done) = InitiatorSession::new(Vec::new(), Vec::new());

        session.on_stdout(Bytes::from_static(b"out")).await.unwrap();
        session.on_stderr(Bytes::from_static(b"err")).await.unwrap();
        session.on_exit(3).await;
        session.handle_close(CloseReason::Eof).await;

        assert_eq!(done.try_recv().unwrap(), Completion::Exited(3));
        let (stdout, stderr) = session.into_inner();
        assert_eq!(stdout, b"out");
        assert_eq!(stderr, b"err");
    }

    #[tokio::test]
    async fn test_close_without_exit() {
        let (mut session, done) = InitiatorSession::new(Vec::new(), Vec::new());

        session
            .handle_close(CloseReason::Aborted("reset".to_string()))
            .await;

        let completion = done.await.unwrap();
        assert!(matches!(
            completion.exit_code(),
            Err(ProtocolError::ConnectionClosed(CloseReason::Aborted(_)))
        ));
    }
}
