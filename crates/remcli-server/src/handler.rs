use crate::dispatcher::CommandDispatcher;
use crate::runner::{run_connection, RunOutcome, RunnerConfig};
use async_trait::async_trait;
use remcli_auth::Principal;
use remcli_tunnel::{ConnectionHandler, DuplexChannel};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs one invocation on every channel the tunnel binds
pub struct CliConnectionHandler {
    dispatcher: Arc<dyn CommandDispatcher>,
    config: RunnerConfig,
}

impl CliConnectionHandler {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, config: RunnerConfig) -> Self {
        Self { dispatcher, config }
    }
}

#[async_trait]
impl ConnectionHandler for CliConnectionHandler {
    async fn handle(&self, channel: DuplexChannel, principal: Principal) {
        let session = channel.session();
        let (reader, writer) = channel.into_split();

        match run_connection(reader, writer, principal, self.dispatcher.clone(), &self.config).await
        {
            Ok(RunOutcome::Exited(code)) => debug!("Session {} exited with {}", session, code),
            Ok(RunOutcome::Cancelled(reason)) => {
                info!("Session {} cancelled: {}", session, reason)
            }
            Err(e) => error!("Session {} failed: {}", session, e),
        }
    }
}
