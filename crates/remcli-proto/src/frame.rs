//! Frame types and the length-prefixed codec

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// One-byte operation codes
///
/// The numeric values are part of the wire format and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Command name or argument (string)
    Arg = 0,
    /// Client locale identifier (string)
    Locale = 1,
    /// Client character encoding (string)
    Encoding = 2,
    /// Seals the argument list and starts the command
    Start = 3,
    /// Exit code (i32 BE)
    Exit = 4,
    /// Chunk of stdin
    Stdin = 5,
    /// EOF on stdin
    EndStdin = 6,
    /// Chunk of stdout
    Stdout = 7,
    /// Chunk of stderr
    Stderr = 8,
}

impl Op {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Op::Arg),
            1 => Some(Op::Locale),
            2 => Some(Op::Encoding),
            3 => Some(Op::Start),
            4 => Some(Op::Exit),
            5 => Some(Op::Stdin),
            6 => Some(Op::EndStdin),
            7 => Some(Op::Stdout),
            8 => Some(Op::Stderr),
            _ => None,
        }
    }

    /// True if this operation is sent by the initiator, false if by the responder.
    pub fn sent_by_initiator(self) -> bool {
        !matches!(self, Op::Exit | Op::Stdout | Op::Stderr)
    }
}

/// A single protocol frame
///
/// The opcode is kept as a raw byte so frames with unknown opcodes can still
/// be carried through the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Frame header size: length (4) + opcode (1)
    pub const HEADER_SIZE: usize = 5;

    pub fn new(op: Op, payload: Bytes) -> Self {
        Self {
            opcode: op as u8,
            payload,
        }
    }

    pub fn empty(op: Op) -> Self {
        Self::new(op, Bytes::new())
    }

    /// Frame carrying a length-prefixed UTF-8 string
    pub fn text(op: Op, text: &str) -> Result<Self, FramingError> {
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(FramingError::StringTooLong(bytes.len()));
        }
        let mut buf = BytesMut::with_capacity(2 + bytes.len());
        buf.put_u16(bytes.len() as u16);
        buf.put_slice(bytes);
        Ok(Self::new(op, buf.freeze()))
    }

    /// Frame carrying a big-endian i32
    pub fn int(op: Op, value: i32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i32(value);
        Self::new(op, buf.freeze())
    }

    /// The known operation, or `None` for opcodes this side does not understand
    pub fn op(&self) -> Option<Op> {
        Op::from_u8(self.opcode)
    }

    /// Parse the payload as a length-prefixed UTF-8 string
    pub fn read_text(&self) -> Result<String, PayloadError> {
        let mut payload = self.payload.clone();
        if payload.remaining() < 2 {
            return Err(PayloadError::Short);
        }
        let len = payload.get_u16() as usize;
        if payload.remaining() < len {
            return Err(PayloadError::Short);
        }
        String::from_utf8(payload.split_to(len).to_vec()).map_err(|_| PayloadError::InvalidUtf8)
    }

    /// Parse the payload as a big-endian i32
    pub fn read_int(&self) -> Result<i32, PayloadError> {
        let mut payload = self.payload.clone();
        if payload.remaining() < 4 {
            return Err(PayloadError::Short);
        }
        Ok(payload.get_i32())
    }
}

/// Unrecoverable framing errors; the connection is aborted
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Corrupt stream: negative operation code {0:#04x}")]
    CorruptOpcode(u8),

    #[error("Stream ended inside a frame ({0} bytes buffered)")]
    Truncated(usize),

    #[error("String too long for a frame: {0} bytes")]
    StringTooLong(usize),
}

/// A known opcode whose payload could not be parsed
///
/// This is the handler's problem, not the codec's: the frame is dropped and
/// the connection stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload too short")]
    Short,

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Length-prefixed frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: crate::MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < Frame::HEADER_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_size {
            return Err(FramingError::FrameTooLarge(length));
        }

        let opcode = src[4];
        if opcode & 0x80 != 0 {
            return Err(FramingError::CorruptOpcode(opcode));
        }

        if src.len() < Frame::HEADER_SIZE + length {
            src.reserve(Frame::HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(Frame::HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        Ok(Some(Frame { opcode, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FramingError::Truncated(src.len())),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FramingError> {
        let length = frame.payload.len();
        if length > self.max_frame_size {
            return Err(FramingError::FrameTooLarge(length));
        }

        dst.reserve(Frame::HEADER_SIZE + length);
        dst.put_u32(length as u32);
        dst.put_u8(frame.opcode);
        dst.put(frame.payload);

        Ok(())
    }
}
