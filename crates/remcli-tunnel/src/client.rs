//! Client side of the tunnel: opens both legs and waits for the server

use crate::channel::DuplexChannel;
use crate::error::TunnelError;
use crate::registry::{SessionId, Side};
use crate::{CLI_PATH, DEFAULT_SESSION_TIMEOUT, READY_MARKER, SESSION_HEADER, SIDE_HEADER};
use futures::TryStreamExt;
use remcli_auth::Credential;
use reqwest::{StatusCode, Url};
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;
use uuid::Uuid;

pub struct TunnelClientBuilder {
    base_url: String,
    authorization: Option<String>,
    accept_invalid_certs: bool,
    handshake_timeout: Duration,
    buffer_size: usize,
}

impl TunnelClientBuilder {
    /// Raw `Authorization` header value sent on both legs
    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn credential(mut self, credential: &Credential) -> Self {
        self.authorization = credential.authorization_header();
        self
    }

    /// Skip TLS certificate verification
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// How long to wait for the readiness marker
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TunnelClient, TunnelError> {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!("{}{}?remoting=false", base, CLI_PATH))
            .map_err(|e| TunnelError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TunnelError::InvalidUrl(format!(
                "{}: expected an http or https URL",
                self.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;

        Ok(TunnelClient {
            http,
            endpoint,
            authorization: self.authorization,
            handshake_timeout: self.handshake_timeout,
            buffer_size: self.buffer_size,
        })
    }
}

/// Opens duplex channels to one server
pub struct TunnelClient {
    http: reqwest::Client,
    endpoint: Url,
    authorization: Option<String>,
    handshake_timeout: Duration,
    buffer_size: usize,
}

impl TunnelClient {
    pub fn builder(base_url: impl Into<String>) -> TunnelClientBuilder {
        TunnelClientBuilder {
            base_url: base_url.into(),
            authorization: None,
            accept_invalid_certs: false,
            handshake_timeout: DEFAULT_SESSION_TIMEOUT,
            buffer_size: 64 * 1024,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Open both legs of a new session and wait until the server binds them
    pub async fn connect(&self) -> Result<DuplexChannel, TunnelError> {
        let session = Uuid::new_v4();
        debug!("Opening session {} to {}", session, self.endpoint);

        let download = check_status(self.leg(session, Side::Download).send().await?).await?;
        let mut reader = StreamReader::new(download.bytes_stream().map_err(io::Error::other));

        let (writer, upload_source) = tokio::io::duplex(self.buffer_size);
        let upload = self
            .leg(session, Side::Upload)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(upload_source)));
        let (status_tx, mut status_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = upload.send().await;
            match &result {
                Ok(response) => debug!("Upload leg of {} finished: {}", session, response.status()),
                Err(e) => debug!("Upload leg of {} failed: {}", session, e),
            }
            let _ = status_tx.send(result);
        });

        let handshake = async {
            tokio::select! {
                marker = reader.read_u8() => match marker {
                    Ok(READY_MARKER) => Ok(()),
                    Ok(other) => Err(TunnelError::Handshake(format!(
                        "unexpected readiness marker {:#04x}",
                        other
                    ))),
                    Err(e) => Err(TunnelError::Handshake(format!(
                        "download leg closed before readiness marker: {}",
                        e
                    ))),
                },
                upload = &mut status_rx => Err(match upload {
                    Ok(Ok(response)) => match check_status(response).await {
                        Err(e) => e,
                        Ok(_) => TunnelError::Handshake(
                            "upload leg finished before the channel was ready".to_string(),
                        ),
                    },
                    Ok(Err(e)) => TunnelError::Http(e),
                    Err(_) => TunnelError::Handshake("upload leg aborted".to_string()),
                }),
            }
        };

        match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TunnelError::Handshake(
                    "timed out waiting for readiness marker".to_string(),
                ))
            }
        }

        debug!("Session {} ready", session);
        Ok(DuplexChannel::new(session, Box::pin(reader), Box::pin(writer)))
    }

    fn leg(&self, session: SessionId, side: Side) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(SESSION_HEADER, session.to_string())
            .header(SIDE_HEADER, side.as_str());
        if let Some(authorization) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        request
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TunnelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match text.trim() {
        "" => status.canonical_reason().unwrap_or("no reason given").to_string(),
        text => text.to_string(),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(TunnelError::Unauthorized {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(TunnelError::HttpStatus {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_built_from_base_url() {
        let client = TunnelClient::builder("http://localhost:8080/").build().unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "http://localhost:8080/cli?remoting=false"
        );

        let client = TunnelClient::builder("https://ci.example.com/jenkins")
            .build()
            .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://ci.example.com/jenkins/cli?remoting=false"
        );
    }

    #[test]
    fn test_invalid_urls_rejected() {
        assert!(matches!(
            TunnelClient::builder("not a url").build(),
            Err(TunnelError::InvalidUrl(_))
        ));
        assert!(matches!(
            TunnelClient::builder("ftp://example.com").build(),
            Err(TunnelError::InvalidUrl(_))
        ));
    }
}
