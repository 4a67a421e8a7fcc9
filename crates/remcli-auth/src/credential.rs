use crate::AuthError;
use base64::Engine;
use remcli_keys::KeyPair;
use std::fmt;
use std::sync::Arc;

/// Client-side credential presented on every tunnel leg
#[derive(Clone)]
pub enum Credential {
    Bearer(String),
    Basic { user: String, password: String },
    /// Public-key authentication; signs server challenges, sends no header
    Key(Arc<KeyPair>),
}

/// Resolve a secret given on the command line
///
/// `@path` reads the file and trims surrounding whitespace; anything else is
/// taken literally.
pub fn read_secret(value: &str) -> Result<String, AuthError> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map(|text| text.trim().to_string())
            .map_err(|source| AuthError::SecretFile {
                path: path.to_string(),
                source,
            }),
        None => Ok(value.to_string()),
    }
}

impl Credential {
    /// Parse `user:password` or `@file` holding `user:password`
    pub fn basic_from_arg(value: &str) -> Result<Self, AuthError> {
        let secret = read_secret(value)?;
        let (user, password) = secret.split_once(':').ok_or_else(|| {
            AuthError::InvalidFormat("expected user:password or @file".to_string())
        })?;
        Ok(Credential::Basic {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Parse a token or `@file` holding the token
    pub fn bearer_from_arg(value: &str) -> Result<Self, AuthError> {
        let token = read_secret(value)?;
        if token.is_empty() {
            return Err(AuthError::InvalidFormat("empty bearer token".to_string()));
        }
        Ok(Credential::Bearer(token))
    }

    /// The `Authorization` header value, if this credential sends one
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Credential::Bearer(token) => Some(format!("Bearer {}", token)),
            Credential::Basic { user, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", user, password));
                Some(format!("Basic {}", encoded))
            }
            Credential::Key(_) => None,
        }
    }

    /// Armored signature over a server challenge, for key credentials
    pub fn sign_challenge(&self, challenge: &[u8]) -> Result<Option<String>, AuthError> {
        match self {
            Credential::Key(key) => Ok(Some(key.sign_challenge_pem(challenge)?)),
            _ => Ok(None),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Credential::Bearer(_) => "bearer",
            Credential::Basic { .. } => "basic",
            Credential::Key(_) => "publickey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
            Credential::Basic { user, .. } => write!(f, "Basic({}:***)", user),
            Credential::Key(key) => write!(f, "Key({:?})", key),
        }
    }
}
