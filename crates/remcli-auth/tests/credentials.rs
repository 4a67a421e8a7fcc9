use remcli_auth::{
    read_secret, AuthError, AuthResult, Credential, HttpAuthConfig, HttpAuthenticator,
};
use http::{HeaderMap, HeaderValue};
use std::io::Write;
use std::sync::Arc;

#[test]
fn test_header_literals() {
    let bearer = Credential::Bearer("abc".to_string());
    assert_eq!(bearer.authorization_header().as_deref(), Some("Bearer abc"));

    let basic = Credential::Basic {
        user: "user".to_string(),
        password: "pass".to_string(),
    };
    assert_eq!(
        basic.authorization_header().as_deref(),
        Some("Basic dXNlcjpwYXNz")
    );
}

#[test]
fn test_basic_from_arg() {
    match Credential::basic_from_arg("alice:s3:cret").unwrap() {
        Credential::Basic { user, password } => {
            assert_eq!(user, "alice");
            assert_eq!(password, "s3:cret");
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(matches!(
        Credential::basic_from_arg("no-colon"),
        Err(AuthError::InvalidFormat(_))
    ));
}

#[test]
fn test_secret_file_is_trimmed() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "  bob:hunter2  ").unwrap();
    let arg = format!("@{}", file.path().display());

    assert_eq!(read_secret(&arg).unwrap(), "bob:hunter2");
    let credential = Credential::basic_from_arg(&arg).unwrap();
    assert_eq!(
        credential.authorization_header().as_deref(),
        Some("Basic Ym9iOmh1bnRlcjI=")
    );

    assert!(matches!(
        read_secret("@/definitely/not/here"),
        Err(AuthError::SecretFile { .. })
    ));
}

#[test]
fn test_client_header_passes_server_check() {
    let authenticator = HttpAuthenticator::from_config(&HttpAuthConfig::Basic {
        credentials: vec!["carol:pw".to_string()],
    });
    let credential = Credential::basic_from_arg("carol:pw").unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        HeaderValue::from_str(&credential.authorization_header().unwrap()).unwrap(),
    );

    match authenticator.authenticate(&headers) {
        AuthResult::Authenticated(principal) => assert_eq!(principal.to_string(), "carol"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_key_credential_signs_instead_of_header() {
    let key = remcli_keys::load_key(
        concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../remcli-keys/tests/fixtures/ed25519_openssh"
        ),
        None,
    )
    .unwrap();
    let credential = Credential::Key(Arc::new(key));

    assert_eq!(credential.authorization_header(), None);
    let signature = credential.sign_challenge(b"nonce").unwrap().unwrap();
    assert!(signature.starts_with("-----BEGIN SSH SIGNATURE-----"));

    assert_eq!(
        Credential::Bearer("t".into()).sign_challenge(b"nonce").unwrap(),
        None
    );
}
