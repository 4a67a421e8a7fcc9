//! HTTP endpoint accepting tunnel legs
//!
//! Status codes:
//! - 403: `remoting` query parameter missing or not `false`
//! - 401: authentication failed (with `WWW-Authenticate`)
//! - 400: missing or malformed `Session` / `Side` header
//! - 409: the session already has a leg for that side
//! - 403: the other leg authenticated as a different principal
//! - 408: an upload leg whose session expired before pairing

use crate::channel::{DuplexChannel, LegReader};
use crate::registry::{
    DownloadLeg, Leg, Offer, PairedLegs, SessionId, SessionRegistry, Side, UploadLeg,
};
use crate::error::RegistryError;
use crate::{CLI_PATH, DEFAULT_SESSION_TIMEOUT, READY_MARKER, SESSION_HEADER, SIDE_HEADER};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures::TryStreamExt;
use remcli_auth::{AuthResult, HttpAuthenticator, Principal};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

/// Receives every fully bound channel
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve one connection; dropping the channel closes both legs
    async fn handle(&self, channel: DuplexChannel, principal: Principal);
}

#[derive(Debug, Clone)]
pub struct TunnelServerConfig {
    /// How long the first leg waits for its partner
    pub session_timeout: Duration,
    /// How often expired sessions are purged
    pub reaper_interval: Duration,
    /// Buffer between the handler and the download response body
    pub buffer_size: usize,
}

impl Default for TunnelServerConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            reaper_interval: Duration::from_secs(1),
            buffer_size: 64 * 1024,
        }
    }
}

struct ServerState {
    registry: Arc<SessionRegistry>,
    authenticator: Arc<HttpAuthenticator>,
    handler: Arc<dyn ConnectionHandler>,
    buffer_size: usize,
}

/// Tunnel endpoint server
pub struct TunnelServer {
    state: Arc<ServerState>,
    reaper_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct CliQuery {
    remoting: Option<String>,
}

impl TunnelServer {
    pub fn new(
        config: TunnelServerConfig,
        authenticator: HttpAuthenticator,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                registry: Arc::new(SessionRegistry::new(config.session_timeout)),
                authenticator: Arc::new(authenticator),
                handler,
                buffer_size: config.buffer_size,
            }),
            reaper_interval: config.reaper_interval,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    /// Router serving the tunnel endpoint
    pub fn router(&self) -> Router {
        Router::new()
            .route(CLI_PATH, post(cli_endpoint))
            .with_state(self.state.clone())
    }

    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.state.registry.spawn_reaper(self.reaper_interval)
    }

    /// Serve on the listener until the server fails
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Tunnel endpoint listening on http://{}{}", addr, CLI_PATH);
        }
        info!(
            "Authentication: {}",
            self.state.authenticator.auth_types().join(", ")
        );

        let reaper = self.spawn_reaper();
        let router = self.router();
        let result = axum::serve(listener, router).await;
        reaper.abort();
        result
    }
}

async fn cli_endpoint(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CliQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if query.remoting.as_deref() != Some("false") {
        return (
            StatusCode::FORBIDDEN,
            "Remoting mode is not supported; use remoting=false",
        )
            .into_response();
    }

    let principal = match state.authenticator.authenticate(&headers) {
        AuthResult::Authenticated(principal) => principal,
        AuthResult::Unauthorized { challenge } => {
            debug!("Rejecting unauthenticated tunnel leg");
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, challenge)],
                "Authentication required",
            )
                .into_response();
        }
    };

    let Some(session) = header_str(&headers, SESSION_HEADER)
        .and_then(|value| value.parse::<SessionId>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing or invalid Session header").into_response();
    };
    let Some(side) = header_str(&headers, SIDE_HEADER).and_then(|value| value.parse::<Side>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing or invalid Side header").into_response();
    };

    debug!("Session {}: {} leg from {}", session, side, principal);
    match side {
        Side::Download => download_leg(&state, session, principal),
        Side::Upload => upload_leg(&state, session, principal, body).await,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn download_leg(state: &Arc<ServerState>, session: SessionId, principal: Principal) -> Response {
    let (writer, reader) = tokio::io::duplex(state.buffer_size);
    let leg = Leg::Download(DownloadLeg {
        writer: Box::pin(writer),
        principal,
    });

    match state.registry.offer(session, leg) {
        Ok(Offer::Parked) => {}
        Ok(Offer::Paired(pair)) => spawn_connection(state, pair),
        Err(err) => return rejected_leg(err),
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

async fn upload_leg(
    state: &Arc<ServerState>,
    session: SessionId,
    principal: Principal,
    body: Body,
) -> Response {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let (reader, released) = LegReader::new(Box::pin(StreamReader::new(stream)));
    let (paired, paired_rx) = oneshot::channel();
    let leg = Leg::Upload(UploadLeg {
        reader,
        principal,
        paired,
    });

    match state.registry.offer(session, leg) {
        Ok(Offer::Parked) => {}
        Ok(Offer::Paired(pair)) => spawn_connection(state, pair),
        Err(err) => return rejected_leg(err),
    }

    if paired_rx.await.is_err() {
        debug!("Session {} expired waiting for download leg", session);
        return (
            StatusCode::REQUEST_TIMEOUT,
            "Session expired before both legs connected",
        )
            .into_response();
    }

    // hold the request open until the connection is done reading
    let _ = released.await;
    debug!("Session {}: upload leg released", session);
    StatusCode::OK.into_response()
}

fn rejected_leg(err: RegistryError) -> Response {
    let status = match err {
        RegistryError::DuplicateLeg { .. } => StatusCode::CONFLICT,
        RegistryError::PrincipalMismatch { .. } => StatusCode::FORBIDDEN,
    };
    warn!("Rejecting tunnel leg: {}", err);
    (status, err.to_string()).into_response()
}

fn spawn_connection(state: &Arc<ServerState>, pair: PairedLegs) {
    let handler = state.handler.clone();
    tokio::spawn(async move {
        let (mut channel, principal) = pair.into_channel();
        let session = channel.session();

        if let Err(e) = write_ready_marker(&mut channel).await {
            warn!("Session {}: failed to send readiness marker: {}", session, e);
            return;
        }

        info!("Session {} bound for {}", session, principal);
        handler.handle(channel, principal).await;
        debug!("Session {} finished", session);
    });
}

async fn write_ready_marker(channel: &mut DuplexChannel) -> std::io::Result<()> {
    channel.write_u8(READY_MARKER).await?;
    channel.flush().await
}
