//! Format detection and the public loading entry points

use crate::error::KeyError;
use crate::keypair::KeyPair;
use crate::{legacy, openssh};
use ssh_key::PrivateKey;
use std::path::Path;
use tracing::debug;

/// Load a private key file
pub fn load_key(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<KeyPair, KeyError> {
    let path = path.as_ref();
    debug!("loading key from {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => KeyError::malformed("key file is not text"),
        _ => KeyError::Io(e),
    })?;
    load_key_str(&text, passphrase)
}

/// Load a private key from its armored text
pub fn load_key_str(text: &str, passphrase: Option<&str>) -> Result<KeyPair, KeyError> {
    let pem = pem::parse(text).map_err(KeyError::malformed)?;

    let private = match pem.tag() {
        legacy::RSA_TAG | legacy::DSA_TAG => {
            let data = legacy::decode(&pem, passphrase)?;
            PrivateKey::new(data, "").map_err(KeyError::malformed)?
        }
        openssh::OPENSSH_TAG => openssh::decode(pem.contents(), text, passphrase)?,
        other => {
            return Err(KeyError::malformed(format!(
                "unrecognized key container: {}",
                other
            )))
        }
    };

    Ok(KeyPair::new(private))
}

/// Whether the key at `text` needs a passphrase, without trying to decrypt it
pub fn is_encrypted(text: &str) -> Result<bool, KeyError> {
    let pem = pem::parse(text).map_err(KeyError::malformed)?;
    match pem.tag() {
        legacy::RSA_TAG | legacy::DSA_TAG => Ok(legacy::is_encrypted(&pem)),
        openssh::OPENSSH_TAG => Ok(PrivateKey::from_openssh(text)
            .map_err(KeyError::malformed)?
            .is_encrypted()),
        other => Err(KeyError::malformed(format!(
            "unrecognized key container: {}",
            other
        ))),
    }
}
