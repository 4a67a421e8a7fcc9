//! Remote CLI Protocol Definitions
//!
//! This crate defines the length-framed duplex protocol spoken between a CLI
//! client (the initiator) and the server running the command (the responder).
//!
//! Each direction is a sequence of frames:
//!
//! ```text
//! [length: u32 BE][opcode: u8][payload: length bytes]
//! ```
//!
//! The length counts the payload only. Frames with opcodes this side does not
//! know are consumed and dropped, so either peer may add opcodes later.

pub mod frame;
pub mod invocation;
pub mod protocol;
pub mod sender;
pub mod session;

pub use frame::{Frame, FrameCodec, FramingError, Op, PayloadError};
pub use invocation::{Invocation, InvocationCollector, InvocationHandle, StartSignal};
pub use protocol::{
    run_initiator, run_responder, CloseReason, Initiator, InitiatorHandler, ProtocolError,
    Responder, ResponderHandler,
};
pub use sender::FrameSender;
pub use session::{Completion, InitiatorSession};

/// Maximum payload size of a single frame (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest stdin/stdout chunk put into one frame by the pumps.
///
/// Stays below 64KiB so the same chunks fit into a single WebSocket message.
pub const MAX_CHUNK_SIZE: usize = 60_000;
