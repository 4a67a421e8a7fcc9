//! The bound byte channel handed to connection handlers

use crate::registry::SessionId;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Reader over an upload request body
///
/// The upload request stays open until this reader is dropped; the paired
/// receiver resolves at that point.
pub struct LegReader {
    inner: BoxReader,
    _release: oneshot::Sender<()>,
}

impl LegReader {
    pub fn new(inner: BoxReader) -> (Self, oneshot::Receiver<()>) {
        let (release, released) = oneshot::channel();
        (
            Self {
                inner,
                _release: release,
            },
            released,
        )
    }
}

impl AsyncRead for LegReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

/// One logical full-duplex connection assembled from two HTTP legs
pub struct DuplexChannel {
    session: SessionId,
    reader: BoxReader,
    writer: BoxWriter,
}

impl DuplexChannel {
    pub fn new(session: SessionId, reader: BoxReader, writer: BoxWriter) -> Self {
        Self {
            session,
            reader,
            writer,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Split into independently owned read and write halves
    pub fn into_split(self) -> (BoxReader, BoxWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for DuplexChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writer.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.writer.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.writer.as_mut().poll_shutdown(cx)
    }
}
