//! Private key loading for public-key authentication
//!
//! Three containers are understood, each optionally protected by a passphrase:
//!
//! - legacy PEM `RSA PRIVATE KEY` (PKCS#1)
//! - legacy PEM `DSA PRIVATE KEY` (OpenSSL's version/p/q/g/y/x sequence)
//! - `OPENSSH PRIVATE KEY` (`openssh-key-v1`)
//!
//! Loading either yields a complete [`KeyPair`] or a [`KeyError`]; there is
//! no partially loaded key.

pub mod error;
pub mod keypair;
mod legacy;
pub mod loader;
mod openssh;
pub mod provider;

pub use error::KeyError;
pub use keypair::KeyPair;
pub use loader::{load_key, load_key_str};
pub use provider::KeyProvider;

/// Namespace used for challenge signatures
pub const SIGNATURE_NAMESPACE: &str = "remcli";
