//! Structured primitives over a raw duplex byte channel
//!
//! [`SecureChannel`] sits between the transport and the frame protocol. It
//! offers length-prefixed byte arrays and strings, a one-way upgrade to a
//! symmetric cipher, and a closed value format whose record types are checked
//! against a [`ClassFilter`] before any of their fields are decoded.

pub mod channel;
pub mod cipher;
pub mod error;
pub mod filter;
pub mod value;

pub use channel::SecureChannel;
pub use cipher::{CipherReader, CipherWriter, SessionKey, Transformation};
pub use error::ChannelError;
pub use filter::ClassFilter;
pub use value::Value;

/// Largest byte array accepted by [`SecureChannel::read_byte_array`] (64MB)
pub const MAX_ARRAY_SIZE: usize = 64 * 1024 * 1024;

/// Deepest nesting of lists, maps and records accepted by the value decoder
pub const MAX_VALUE_DEPTH: usize = 64;
