//! `openssh-key-v1` containers

use crate::error::KeyError;
use ssh_key::PrivateKey;
use tracing::debug;

pub(crate) const OPENSSH_TAG: &str = "OPENSSH PRIVATE KEY";

const MAGIC: &[u8] = b"openssh-key-v1\0";

const SUPPORTED_CIPHERS: &[&str] = &[
    "none",
    "aes128-ctr",
    "aes192-ctr",
    "aes256-ctr",
    "aes128-cbc",
    "aes192-cbc",
    "aes256-cbc",
    "aes128-gcm@openssh.com",
    "aes256-gcm@openssh.com",
];

const SUPPORTED_KDFS: &[&str] = &["none", "bcrypt"];

/// Cipher and KDF names from the container header
#[derive(Debug, PartialEq, Eq)]
struct Header {
    cipher: String,
    kdf: String,
}

fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], KeyError> {
    if buf.len() < 4 {
        return Err(KeyError::malformed("truncated openssh-key-v1 header"));
    }
    let (len, rest) = buf.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return Err(KeyError::malformed("truncated openssh-key-v1 header"));
    }
    let (value, rest) = rest.split_at(len);
    *buf = rest;
    Ok(value)
}

fn read_header(blob: &[u8]) -> Result<Header, KeyError> {
    let mut buf = blob
        .strip_prefix(MAGIC)
        .ok_or_else(|| KeyError::malformed("missing openssh-key-v1 magic"))?;
    let cipher = read_string(&mut buf)?;
    let kdf = read_string(&mut buf)?;
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| KeyError::malformed("non-UTF-8 algorithm name"))
    };
    Ok(Header {
        cipher: text(cipher)?,
        kdf: text(kdf)?,
    })
}

fn map_error(err: ssh_key::Error) -> KeyError {
    match err {
        ssh_key::Error::AlgorithmUnknown { .. } | ssh_key::Error::AlgorithmUnsupported { .. } => {
            KeyError::UnsupportedKeyAlgorithm(err.to_string())
        }
        other => KeyError::malformed(other),
    }
}

/// Parse and, if needed, decrypt an OpenSSH private key
///
/// `blob` is the base64-decoded PEM body, `text` the original armored text.
pub(crate) fn decode(
    blob: &[u8],
    text: &str,
    passphrase: Option<&str>,
) -> Result<PrivateKey, KeyError> {
    let header = read_header(blob)?;
    if !SUPPORTED_CIPHERS.contains(&header.cipher.as_str()) {
        return Err(KeyError::UnsupportedKeyAlgorithm(header.cipher));
    }
    if !SUPPORTED_KDFS.contains(&header.kdf.as_str()) {
        return Err(KeyError::UnsupportedKeyAlgorithm(header.kdf));
    }

    let key = PrivateKey::from_openssh(text).map_err(map_error)?;
    if !key.is_encrypted() {
        return Ok(key);
    }

    let passphrase = passphrase.ok_or(KeyError::PassphraseRequired)?;
    debug!("decrypting OpenSSH key ({}, {})", header.cipher, header.kdf);
    key.decrypt(passphrase).map_err(|err| match map_error(err) {
        KeyError::MalformedKeyFile(reason) => {
            debug!("OpenSSH key decryption failed: {}", reason);
            KeyError::IncorrectPassphrase
        }
        other => other,
    })
}
