use thiserror::Error;

/// Secure channel errors
///
/// Everything except `Io` leaves the channel in an unknown state; the caller
/// is expected to drop the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Negative array length: {0}")]
    NegativeLength(i32),

    #[error("Array too large: {0} bytes")]
    TooLarge(usize),

    #[error("String too long: {0} bytes")]
    StringTooLong(usize),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Invalid session key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Unsupported transformation: {0}")]
    UnsupportedTransformation(String),

    #[error("Rejected: {class}")]
    SecurityViolation { class: String },

    #[error("Malformed object: {0}")]
    MalformedObject(String),
}

impl ChannelError {
    pub fn is_security_violation(&self) -> bool {
        matches!(self, ChannelError::SecurityViolation { .. })
    }
}
