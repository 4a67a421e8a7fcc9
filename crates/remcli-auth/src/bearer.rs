//! Bearer Token Authentication provider (RFC 6750)
//!
//! ```text
//! Authorization: Bearer <token>
//! ```
//!
//! Tokens may be configured as `name:token`; the name becomes the principal.
//! A bare token authenticates as `bearer`.

use crate::{authorization_values, strip_scheme, AuthResult, HttpAuthProvider, Principal};
use http::HeaderMap;
use std::collections::HashMap;
use tracing::debug;

/// Bearer Token Authentication provider
pub struct BearerTokenProvider {
    /// Valid token -> principal name
    valid_tokens: HashMap<String, String>,
}

impl BearerTokenProvider {
    pub fn new(tokens: Vec<String>) -> Self {
        let valid_tokens = tokens
            .into_iter()
            .map(|entry| match entry.split_once(':') {
                Some((name, token)) => (token.to_string(), name.to_string()),
                None => (entry, "bearer".to_string()),
            })
            .collect();
        Self { valid_tokens }
    }
}

impl HttpAuthProvider for BearerTokenProvider {
    fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        for value in authorization_values(headers) {
            let Some(token) = strip_scheme(value, "Bearer").filter(|t| !t.is_empty()) else {
                debug!("Bearer auth: could not extract token");
                continue;
            };
            if let Some(name) = self.valid_tokens.get(token) {
                debug!("Bearer auth: valid token for {}", name);
                return AuthResult::Authenticated(Principal {
                    name: name.clone(),
                    scheme: "bearer",
                });
            }
            debug!("Bearer auth: invalid token");
        }

        debug!("Bearer auth: no valid Authorization header found");
        AuthResult::Unauthorized {
            challenge: self.challenge(),
        }
    }

    fn challenge(&self) -> String {
        "Bearer".to_string()
    }

    fn auth_type(&self) -> &'static str {
        "bearer"
    }
}
