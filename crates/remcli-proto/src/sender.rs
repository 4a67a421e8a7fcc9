//! Serialized frame writer shared by every producer on one connection

use crate::frame::{Frame, FrameCodec, FramingError, Op};
use bytes::Bytes;
use futures::SinkExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::trace;

type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Cloneable handle writing frames to one connection
///
/// All frames go through a single lock and each frame is flushed before the
/// lock is released, so stdout and stderr chunks produced concurrently never
/// interleave mid-frame.
#[derive(Clone)]
pub struct FrameSender {
    inner: Arc<Mutex<FramedWrite<BoxWriter, FrameCodec>>>,
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender").finish_non_exhaustive()
    }
}

impl FrameSender {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxWriter = Box::pin(writer);
        Self {
            inner: Arc::new(Mutex::new(FramedWrite::new(writer, FrameCodec::new()))),
        }
    }

    /// Write and flush one frame
    pub async fn send(&self, frame: Frame) -> Result<(), FramingError> {
        trace!(
            "sending frame opcode={} len={}",
            frame.opcode,
            frame.payload.len()
        );
        let mut sink = self.inner.lock().await;
        sink.send(frame).await
    }

    pub async fn send_empty(&self, op: Op) -> Result<(), FramingError> {
        self.send(Frame::empty(op)).await
    }

    pub async fn send_bytes(&self, op: Op, chunk: Bytes) -> Result<(), FramingError> {
        self.send(Frame::new(op, chunk)).await
    }

    pub async fn send_text(&self, op: Op, text: &str) -> Result<(), FramingError> {
        self.send(Frame::text(op, text)?).await
    }

    pub async fn send_int(&self, op: Op, value: i32) -> Result<(), FramingError> {
        self.send(Frame::int(op, value)).await
    }

    /// Flush and shut down the write half
    pub async fn close(&self) -> Result<(), FramingError> {
        let mut sink = self.inner.lock().await;
        SinkExt::<Frame>::close(&mut *sink).await
    }
}
