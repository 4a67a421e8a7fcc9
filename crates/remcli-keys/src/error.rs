use thiserror::Error;

/// Key loading errors
///
/// `UnsupportedKeyAlgorithm` means the container parsed but uses a cipher or
/// key derivation this crate cannot apply; `MalformedKeyFile` means the input
/// is not a usable key container at all.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),

    #[error("Malformed key file: {0}")]
    MalformedKeyFile(String),

    #[error("Key is encrypted and no passphrase was given")]
    PassphraseRequired,

    #[error("Incorrect passphrase")]
    IncorrectPassphrase,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyError {
    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        KeyError::MalformedKeyFile(reason.to_string())
    }
}
