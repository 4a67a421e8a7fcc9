//! Initiator and responder roles on top of the frame codec
//!
//! Each side runs one decode loop that reads frames in arrival order and
//! pushes them into a role-specific handler. Sending is done through
//! [`Initiator`] / [`Responder`], which wrap a shared [`FrameSender`] and can
//! be cloned into any number of producer tasks.

use crate::frame::{Frame, FrameCodec, FramingError, Op, PayloadError};
use crate::sender::FrameSender;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

/// Protocol errors seen by senders and sessions
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid operation for this side: {0:?}")]
    WrongDirection(Op),

    #[error("Connection closed without an exit code: {0}")]
    ConnectionClosed(CloseReason),
}

/// Why a decode loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side cleanly between two frames
    Eof,
    /// The stream broke: corrupt framing, truncated frame, or transport failure
    Aborted(String),
}

impl CloseReason {
    pub fn is_aborted(&self) -> bool {
        matches!(self, CloseReason::Aborted(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Eof => write!(f, "end of stream"),
            CloseReason::Aborted(cause) => write!(f, "aborted: {}", cause),
        }
    }
}

/// Callbacks for the side that runs the command
///
/// Callbacks are invoked from the decode loop, one at a time, in the order
/// the initiator wrote the frames. Anything that must wait for a particular
/// frame (START, say) needs its own synchronization.
#[async_trait]
pub trait ResponderHandler: Send {
    async fn on_arg(&mut self, arg: String);

    async fn on_locale(&mut self, locale: String);

    async fn on_encoding(&mut self, encoding: String);

    async fn on_start(&mut self);

    async fn on_stdin(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn on_end_stdin(&mut self) -> io::Result<()>;

    /// Called exactly once when the decode loop stops
    async fn handle_close(&mut self, reason: CloseReason);
}

/// Callbacks for the side that started the command
#[async_trait]
pub trait InitiatorHandler: Send {
    async fn on_stdout(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn on_stderr(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn on_exit(&mut self, code: i32);

    /// Called exactly once when the decode loop stops
    async fn handle_close(&mut self, reason: CloseReason);
}

enum DispatchFault {
    Payload(PayloadError),
    Io(io::Error),
}

impl From<PayloadError> for DispatchFault {
    fn from(err: PayloadError) -> Self {
        DispatchFault::Payload(err)
    }
}

impl From<io::Error> for DispatchFault {
    fn from(err: io::Error) -> Self {
        DispatchFault::Io(err)
    }
}

#[async_trait]
trait Dispatch: Send {
    const ROLE: &'static str;

    fn accepts(op: Op) -> bool;

    async fn dispatch(&mut self, op: Op, frame: Frame) -> Result<(), DispatchFault>;

    async fn close(&mut self, reason: CloseReason);
}

struct ResponderDispatch<'a, H>(&'a mut H);

#[async_trait]
impl<'a, H: ResponderHandler> Dispatch for ResponderDispatch<'a, H> {
    const ROLE: &'static str = "responder";

    fn accepts(op: Op) -> bool {
        op.sent_by_initiator()
    }

    async fn dispatch(&mut self, op: Op, frame: Frame) -> Result<(), DispatchFault> {
        match op {
            Op::Arg => self.0.on_arg(frame.read_text()?).await,
            Op::Locale => self.0.on_locale(frame.read_text()?).await,
            Op::Encoding => self.0.on_encoding(frame.read_text()?).await,
            Op::Start => self.0.on_start().await,
            Op::Stdin => self.0.on_stdin(frame.payload).await?,
            Op::EndStdin => self.0.on_end_stdin().await?,
            Op::Exit | Op::Stdout | Op::Stderr => unreachable!("filtered by accepts()"),
        }
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.0.handle_close(reason).await
    }
}

struct InitiatorDispatch<'a, H>(&'a mut H);

#[async_trait]
impl<'a, H: InitiatorHandler> Dispatch for InitiatorDispatch<'a, H> {
    const ROLE: &'static str = "initiator";

    fn accepts(op: Op) -> bool {
        !op.sent_by_initiator()
    }

    async fn dispatch(&mut self, op: Op, frame: Frame) -> Result<(), DispatchFault> {
        match op {
            Op::Exit => self.0.on_exit(frame.read_int()?).await,
            Op::Stdout => self.0.on_stdout(frame.payload).await?,
            Op::Stderr => self.0.on_stderr(frame.payload).await?,
            _ => unreachable!("filtered by accepts()"),
        }
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.0.handle_close(reason).await
    }
}

async fn decode_loop<R, D>(reader: R, dispatch: &mut D)
where
    R: AsyncRead + Unpin + Send,
    D: Dispatch,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new());

    let reason = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                warn!("{} connection aborted: {}", D::ROLE, err);
                break CloseReason::Aborted(err.to_string());
            }
            None => break CloseReason::Eof,
        };

        let Some(op) = frame.op() else {
            trace!(
                "dropping frame with unknown opcode {} ({} bytes)",
                frame.opcode,
                frame.payload.len()
            );
            continue;
        };

        if !D::accepts(op) {
            warn!("{} side ignoring unexpected {:?} frame", D::ROLE, op);
            continue;
        }

        trace!("{} handling {:?} frame", D::ROLE, op);
        match dispatch.dispatch(op, frame).await {
            Ok(()) => {}
            Err(DispatchFault::Payload(err)) => {
                warn!("{} side dropping malformed {:?} frame: {}", D::ROLE, op, err);
            }
            Err(DispatchFault::Io(err)) => {
                warn!("{} handler failed on {:?}: {}", D::ROLE, op, err);
                break CloseReason::Aborted(err.to_string());
            }
        }
    };

    debug!("{} decode loop finished: {}", D::ROLE, reason);
    dispatch.close(reason).await;
}

/// Run the responder decode loop until the initiator's stream ends
pub async fn run_responder<R, H>(reader: R, handler: &mut H)
where
    R: AsyncRead + Unpin + Send,
    H: ResponderHandler,
{
    decode_loop(reader, &mut ResponderDispatch(handler)).await
}

/// Run the initiator decode loop until the responder's stream ends
pub async fn run_initiator<R, H>(reader: R, handler: &mut H)
where
    R: AsyncRead + Unpin + Send,
    H: InitiatorHandler,
{
    decode_loop(reader, &mut InitiatorDispatch(handler)).await
}

async fn pump<R>(sender: &FrameSender, op: Op, mut reader: R) -> Result<u64, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; crate::MAX_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        sender
            .send_bytes(op, Bytes::copy_from_slice(&buf[..n]))
            .await?;
        total += n as u64;
    }
}

/// Sending half of the initiator role
#[derive(Debug, Clone)]
pub struct Initiator {
    sender: FrameSender,
}

impl Initiator {
    pub fn new(sender: FrameSender) -> Self {
        Self { sender }
    }

    pub async fn send_arg(&self, arg: &str) -> Result<(), ProtocolError> {
        Ok(self.sender.send_text(Op::Arg, arg).await?)
    }

    pub async fn send_locale(&self, locale: &str) -> Result<(), ProtocolError> {
        Ok(self.sender.send_text(Op::Locale, locale).await?)
    }

    pub async fn send_encoding(&self, encoding: &str) -> Result<(), ProtocolError> {
        Ok(self.sender.send_text(Op::Encoding, encoding).await?)
    }

    pub async fn send_start(&self) -> Result<(), ProtocolError> {
        Ok(self.sender.send_empty(Op::Start).await?)
    }

    pub async fn send_stdin(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        Ok(self.sender.send_bytes(Op::Stdin, chunk).await?)
    }

    pub async fn send_end_stdin(&self) -> Result<(), ProtocolError> {
        Ok(self.sender.send_empty(Op::EndStdin).await?)
    }

    /// Send the argument list, the optional metadata, then START
    pub async fn start<S: AsRef<str>>(
        &self,
        args: &[S],
        encoding: Option<&str>,
        locale: Option<&str>,
    ) -> Result<(), ProtocolError> {
        for arg in args {
            self.send_arg(arg.as_ref()).await?;
        }
        if let Some(encoding) = encoding {
            self.send_encoding(encoding).await?;
        }
        if let Some(locale) = locale {
            self.send_locale(locale).await?;
        }
        self.send_start().await
    }

    /// Copy `stdin` into STDIN frames, then send END_STDIN
    pub async fn pump_stdin<R>(&self, stdin: R) -> Result<u64, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let total = pump(&self.sender, Op::Stdin, stdin).await?;
        self.send_end_stdin().await?;
        debug!("stdin finished after {} bytes", total);
        Ok(total)
    }

    pub async fn close(&self) -> Result<(), ProtocolError> {
        Ok(self.sender.close().await?)
    }
}

/// Sending half of the responder role
#[derive(Debug, Clone)]
pub struct Responder {
    sender: FrameSender,
}

impl Responder {
    pub fn new(sender: FrameSender) -> Self {
        Self { sender }
    }

    pub async fn send_stdout(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        Ok(self.sender.send_bytes(Op::Stdout, chunk).await?)
    }

    pub async fn send_stderr(&self, chunk: Bytes) -> Result<(), ProtocolError> {
        Ok(self.sender.send_bytes(Op::Stderr, chunk).await?)
    }

    pub async fn send_exit(&self, code: i32) -> Result<(), ProtocolError> {
        Ok(self.sender.send_int(Op::Exit, code).await?)
    }

    /// Copy `reader` into STDOUT or STDERR frames until it reaches EOF
    pub async fn pump<R>(&self, op: Op, reader: R) -> Result<u64, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        if !matches!(op, Op::Stdout | Op::Stderr) {
            return Err(ProtocolError::WrongDirection(op));
        }
        pump(&self.sender, op, reader).await
    }

    pub async fn close(&self) -> Result<(), ProtocolError> {
        Ok(self.sender.close().await?)
    }
}
