//! Responder-side accumulation of one command invocation

use crate::protocol::{CloseReason, ResponderHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Buffer between the decode loop and the command reading stdin
const STDIN_PIPE_CAPACITY: usize = 256 * 1024;

/// Arguments and metadata of one command execution, sealed by START
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub locale: Option<String>,
    pub encoding: Option<String>,
}

impl Invocation {
    /// The command name (first argument)
    pub fn command(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Arguments after the command name
    pub fn command_args(&self) -> &[String] {
        self.args.get(1..).unwrap_or(&[])
    }
}

/// Outcome of waiting for START
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartSignal {
    Started(Invocation),
    /// The connection closed before START arrived
    Closed(CloseReason),
}

/// Receiving ends handed to whoever runs the command
#[derive(Debug)]
pub struct InvocationHandle {
    /// Resolves once, on START or on connection close
    pub start: oneshot::Receiver<StartSignal>,
    /// Stdin bytes in arrival order; EOF after END_STDIN or connection close
    pub stdin: DuplexStream,
    /// Becomes `Some` when the decode loop stops
    pub closed: watch::Receiver<Option<CloseReason>>,
}

/// [`ResponderHandler`] that gathers an [`Invocation`] and pipes stdin
pub struct InvocationCollector {
    invocation: Invocation,
    started: bool,
    start_tx: Option<oneshot::Sender<StartSignal>>,
    stdin: Option<DuplexStream>,
    closed_tx: watch::Sender<Option<CloseReason>>,
}

impl InvocationCollector {
    pub fn new() -> (Self, InvocationHandle) {
        let (start_tx, start_rx) = oneshot::channel();
        let (stdin_writer, stdin_reader) = tokio::io::duplex(STDIN_PIPE_CAPACITY);
        let (closed_tx, closed_rx) = watch::channel(None);

        let collector = Self {
            invocation: Invocation::default(),
            started: false,
            start_tx: Some(start_tx),
            stdin: Some(stdin_writer),
            closed_tx,
        };
        let handle = InvocationHandle {
            start: start_rx,
            stdin: stdin_reader,
            closed: closed_rx,
        };
        (collector, handle)
    }

    async fn finish_stdin(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
    }
}

#[async_trait]
impl ResponderHandler for InvocationCollector {
    async fn on_arg(&mut self, arg: String) {
        if self.started {
            warn!("ignoring argument received after START");
            return;
        }
        self.invocation.args.push(arg);
    }

    async fn on_locale(&mut self, locale: String) {
        if !self.started {
            self.invocation.locale = Some(locale);
        }
    }

    async fn on_encoding(&mut self, encoding: String) {
        // Clients resend ENCODING as a keep-alive once the command runs.
        if !self.started {
            self.invocation.encoding = Some(encoding);
        }
    }

    async fn on_start(&mut self) {
        if self.started {
            warn!("duplicate START ignored");
            return;
        }
        self.started = true;
        debug!("START with {} argument(s)", self.invocation.args.len());
        if let Some(tx) = self.start_tx.take() {
            let _ = tx.send(StartSignal::Started(self.invocation.clone()));
        }
    }

    async fn on_stdin(&mut self, chunk: Bytes) -> io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        match stdin.write_all(&chunk).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!("command stopped reading stdin, discarding the rest");
                self.stdin = None;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn on_end_stdin(&mut self) -> io::Result<()> {
        self.finish_stdin().await;
        Ok(())
    }

    async fn handle_close(&mut self, reason: CloseReason) {
        if let Some(tx) = self.start_tx.take() {
            let _ = tx.send(StartSignal::Closed(reason.clone()));
        }
        self.finish_stdin().await;
        let _ = self.closed_tx.send(Some(reason));
    }
}
