//! Authentication for remote CLI connections
//!
//! The client side builds a [`Credential`] and turns it into an
//! `Authorization` header. The server side runs every tunnel leg through an
//! [`HttpAuthenticator`], which yields the [`Principal`] the command runs as.
//!
//! # Supported Authentication Methods
//!
//! - **Basic**: HTTP Basic Authentication (RFC 7617)
//! - **BearerToken**: Authorization header with Bearer token
//!
//! # Usage
//!
//! ```ignore
//! use remcli_auth::{HttpAuthConfig, HttpAuthenticator, AuthResult};
//!
//! let authenticator = HttpAuthenticator::from_config(&HttpAuthConfig::Basic {
//!     credentials: vec!["user:password".to_string()],
//! });
//!
//! match authenticator.authenticate(request.headers()) {
//!     AuthResult::Authenticated(principal) => { /* proceed */ }
//!     AuthResult::Unauthorized { challenge } => { /* return 401 */ }
//! }
//! ```

mod basic;
mod bearer;
mod credential;

pub use basic::BasicAuthProvider;
pub use bearer::BearerTokenProvider;
pub use credential::{read_secret, Credential};

use http::HeaderMap;
use std::fmt;
use thiserror::Error;

/// The identity a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    /// Scheme that produced this principal ("basic", "bearer", "none")
    pub scheme: &'static str,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            scheme: "none",
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.scheme == "none"
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Authentication result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Request is authenticated (no auth required or valid credentials)
    Authenticated(Principal),
    /// Request requires authentication; `challenge` is the WWW-Authenticate value
    Unauthorized { challenge: String },
}

/// Error type for authentication operations
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials format: {0}")]
    InvalidFormat(String),

    #[error("Failed to read secret from {path}: {source}")]
    SecretFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key error: {0}")]
    Key(#[from] remcli_keys::KeyError),
}

/// Which authentication scheme a server accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuthConfig {
    None,
    Basic { credentials: Vec<String> },
    BearerToken { tokens: Vec<String> },
}

/// Trait for implementing HTTP authentication providers
///
/// Implementations are stateless; each call to `authenticate` stands alone.
pub trait HttpAuthProvider: Send + Sync {
    /// Authenticate the request based on its headers
    fn authenticate(&self, headers: &HeaderMap) -> AuthResult;

    /// Value of the WWW-Authenticate header sent with a 401
    fn challenge(&self) -> String;

    /// Return the authentication type name (for logging)
    fn auth_type(&self) -> &'static str;
}

/// Values of every `Authorization` header that is valid text
pub(crate) fn authorization_values(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(http::header::AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
}

/// Strip a case-insensitive scheme prefix such as `"Basic "`
pub(crate) fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix_len = scheme.len() + 1;
    if value.len() < prefix_len || !value.is_char_boundary(prefix_len) {
        return None;
    }
    let (prefix, rest) = value.split_at(prefix_len);
    if prefix[..scheme.len()].eq_ignore_ascii_case(scheme) && prefix.ends_with(' ') {
        Some(rest.trim())
    } else {
        None
    }
}

/// No-op authentication provider (always allows requests)
pub struct NoAuthProvider;

impl HttpAuthProvider for NoAuthProvider {
    fn authenticate(&self, _headers: &HeaderMap) -> AuthResult {
        AuthResult::Authenticated(Principal::anonymous())
    }

    fn challenge(&self) -> String {
        "Basic".to_string()
    }

    fn auth_type(&self) -> &'static str {
        "none"
    }
}

/// Authenticator tried by the tunnel for every leg
///
/// With several providers, the first one that accepts the request wins; the
/// challenge of a rejected request comes from the first provider.
pub struct HttpAuthenticator {
    providers: Vec<Box<dyn HttpAuthProvider>>,
}

impl HttpAuthenticator {
    /// Create a new authenticator from the given configuration
    pub fn from_config(config: &HttpAuthConfig) -> Self {
        Self::from_configs(std::slice::from_ref(config))
    }

    /// Accept any of several schemes; an empty list means no authentication
    pub fn from_configs(configs: &[HttpAuthConfig]) -> Self {
        let providers: Vec<Box<dyn HttpAuthProvider>> = configs
            .iter()
            .filter_map(|config| -> Option<Box<dyn HttpAuthProvider>> {
                match config {
                    HttpAuthConfig::None => None,
                    HttpAuthConfig::Basic { credentials } => {
                        Some(Box::new(BasicAuthProvider::new(credentials.clone())))
                    }
                    HttpAuthConfig::BearerToken { tokens } => {
                        Some(Box::new(BearerTokenProvider::new(tokens.clone())))
                    }
                }
            })
            .collect();

        if providers.is_empty() {
            return Self::default();
        }
        Self { providers }
    }

    /// Create a new authenticator with a custom provider
    pub fn with_provider(provider: Box<dyn HttpAuthProvider>) -> Self {
        Self {
            providers: vec![provider],
        }
    }

    /// Authenticate an HTTP request
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        for provider in &self.providers {
            if let AuthResult::Authenticated(principal) = provider.authenticate(headers) {
                return AuthResult::Authenticated(principal);
            }
        }
        AuthResult::Unauthorized {
            challenge: self
                .providers
                .first()
                .map(|p| p.challenge())
                .unwrap_or_else(|| "Basic".to_string()),
        }
    }

    /// Names of the configured schemes
    pub fn auth_types(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.auth_type()).collect()
    }

    /// Check if authentication is required
    pub fn requires_auth(&self) -> bool {
        self.providers.iter().any(|p| p.auth_type() != "none")
    }
}

impl Default for HttpAuthenticator {
    fn default() -> Self {
        Self::with_provider(Box::new(NoAuthProvider))
    }
}
