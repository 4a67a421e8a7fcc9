//! HTTP Basic Authentication provider (RFC 7617)
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```

use crate::{authorization_values, strip_scheme, AuthResult, HttpAuthProvider, Principal};
use base64::Engine;
use http::HeaderMap;
use std::collections::HashSet;
use tracing::debug;

/// Accepts a fixed set of `user:password` pairs; the user becomes the principal
pub struct BasicAuthProvider {
    valid_credentials: HashSet<String>,
    realm: String,
}

impl BasicAuthProvider {
    pub fn new(credentials: Vec<String>) -> Self {
        Self::with_realm(credentials, "remcli".to_string())
    }

    pub fn with_realm(credentials: Vec<String>, realm: String) -> Self {
        Self {
            valid_credentials: credentials.into_iter().collect(),
            realm,
        }
    }

    /// Decoded `user:password`, if the header uses the Basic scheme
    fn extract_credentials(&self, auth_header: &str) -> Option<String> {
        let encoded = strip_scheme(auth_header, "Basic")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()?;
        String::from_utf8(decoded).ok()
    }
}

impl HttpAuthProvider for BasicAuthProvider {
    fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        for value in authorization_values(headers) {
            let Some(credentials) = self.extract_credentials(value) else {
                debug!("Basic auth: could not decode credentials");
                continue;
            };
            if self.valid_credentials.contains(&credentials) {
                let user = credentials
                    .split_once(':')
                    .map(|(user, _)| user)
                    .unwrap_or(&credentials);
                debug!("Basic auth: valid credentials for {}", user);
                return AuthResult::Authenticated(Principal {
                    name: user.to_string(),
                    scheme: "basic",
                });
            }
            debug!("Basic auth: invalid credentials");
        }

        debug!("Basic auth: no valid Authorization header found");
        AuthResult::Unauthorized {
            challenge: self.challenge(),
        }
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm.replace('"', "\\\""))
    }

    fn auth_type(&self) -> &'static str {
        "basic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn make_basic_auth_header(username: &str, password: &str) -> HeaderMap {
        let credentials = format!("{}:{}", username, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_valid_credentials() {
        let provider = BasicAuthProvider::new(vec!["user:password".to_string()]);

        assert_eq!(
            provider.authenticate(&make_basic_auth_header("user", "password")),
            AuthResult::Authenticated(Principal {
                name: "user".to_string(),
                scheme: "basic",
            })
        );
    }

    #[test]
    fn test_invalid_credentials() {
        let provider = BasicAuthProvider::new(vec!["user:password".to_string()]);

        assert!(matches!(
            provider.authenticate(&make_basic_auth_header("user", "wrong")),
            AuthResult::Unauthorized { .. }
        ));
    }

    #[test]
    fn test_missing_authorization_header() {
        let provider = BasicAuthProvider::new(vec!["user:password".to_string()]);

        assert!(matches!(
            provider.authenticate(&HeaderMap::new()),
            AuthResult::Unauthorized { .. }
        ));
    }

    #[test]
    fn test_wrong_auth_scheme() {
        let provider = BasicAuthProvider::new(vec!["user:password".to_string()]);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sometoken"),
        );

        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Unauthorized { .. }
        ));
    }

    #[test]
    fn test_password_may_contain_colons() {
        let provider = BasicAuthProvider::new(vec!["admin:a:b:c".to_string()]);

        match provider.authenticate(&make_basic_auth_header("admin", "a:b:c")) {
            AuthResult::Authenticated(principal) => assert_eq!(principal.name, "admin"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_custom_realm() {
        let provider = BasicAuthProvider::with_realm(vec!["u:p".to_string()], "My App".to_string());
        assert_eq!(provider.challenge(), "Basic realm=\"My App\"");
    }

    #[test]
    fn test_malformed_base64() {
        let provider = BasicAuthProvider::new(vec!["user:password".to_string()]);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic !!!invalid!!!"),
        );

        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Unauthorized { .. }
        ));
    }
}
