//! Responder side of one connection: collect the invocation, run it, report EXIT

use crate::dispatcher::{CommandContext, CommandDispatcher, CommandIo, EXIT_USAGE};
use crate::error::ServerError;
use bytes::Bytes;
use remcli_auth::Principal;
use remcli_proto::{
    run_responder, CloseReason, FrameSender, InvocationCollector, Op, Responder, StartSignal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Buffer between the command's stdout/stderr and the frame pumps
const OUTPUT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for START after the connection opens
    pub start_timeout: Duration,
    /// How long to wait for the client to hang up after EXIT
    pub close_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(15),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// EXIT was sent with this code
    Exited(i32),
    /// The client went away while the command was running
    Cancelled(CloseReason),
}

/// Serve one invocation over a duplex byte stream
pub async fn run_connection<R, W>(
    reader: R,
    writer: W,
    principal: Principal,
    dispatcher: Arc<dyn CommandDispatcher>,
    config: &RunnerConfig,
) -> Result<RunOutcome, ServerError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    let responder = Responder::new(FrameSender::new(writer));
    let (mut collector, handle) = InvocationCollector::new();
    let decode = tokio::spawn(async move {
        run_responder(reader, &mut collector).await;
    });

    let invocation = match tokio::time::timeout(config.start_timeout, handle.start).await {
        Ok(Ok(StartSignal::Started(invocation))) => invocation,
        Ok(Ok(StartSignal::Closed(reason))) => {
            debug!("Connection closed before START: {}", reason);
            let code = reject(&responder, "Connection closed before arguments received").await;
            decode.abort();
            return Ok(RunOutcome::Exited(code));
        }
        Ok(Err(_)) => {
            let code = reject(&responder, "Connection closed before arguments received").await;
            decode.abort();
            return Ok(RunOutcome::Exited(code));
        }
        Err(_) => {
            warn!("No START within {:?}", config.start_timeout);
            let code = reject(&responder, "Timed out waiting for arguments").await;
            decode.abort();
            return Ok(RunOutcome::Exited(code));
        }
    };

    let command_name = invocation.command().unwrap_or("").to_string();
    info!(
        "Running '{}' for {} ({} argument(s))",
        command_name,
        principal,
        invocation.command_args().len()
    );

    let (stdout_writer, stdout_reader) = tokio::io::duplex(OUTPUT_PIPE_CAPACITY);
    let (stderr_writer, stderr_reader) = tokio::io::duplex(OUTPUT_PIPE_CAPACITY);
    let stdout_pump = {
        let responder = responder.clone();
        tokio::spawn(async move { responder.pump(Op::Stdout, stdout_reader).await })
    };
    let stderr_pump = {
        let responder = responder.clone();
        tokio::spawn(async move { responder.pump(Op::Stderr, stderr_reader).await })
    };

    let io = CommandIo {
        stdin: Box::pin(handle.stdin),
        stdout: Box::pin(stdout_writer),
        stderr: Box::pin(stderr_writer),
    };
    let context = CommandContext {
        invocation,
        principal,
    };

    let mut closed = handle.closed;
    let result = tokio::select! {
        result = dispatcher.dispatch(context, io) => result,
        reason = wait_closed(&mut closed) => {
            warn!("Command '{}' cancelled: connection {}", command_name, reason);
            stdout_pump.abort();
            stderr_pump.abort();
            decode.abort();
            return Ok(RunOutcome::Cancelled(reason));
        }
    };

    // EXIT must follow every output frame
    for pump in [stdout_pump, stderr_pump] {
        match pump.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Output pump stopped: {}", e),
            Err(e) => debug!("Output pump task failed: {}", e),
        }
    }

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            debug!("Command '{}' failed: {}", command_name, e);
            responder
                .send_stderr(Bytes::from(format!("ERROR: {}\n", e)))
                .await?;
            e.exit_code()
        }
    };

    responder.send_exit(code).await?;
    responder.close().await?;
    debug!("Command '{}' exited with {}", command_name, code);

    if tokio::time::timeout(config.close_grace, decode).await.is_err() {
        debug!("Client did not hang up after EXIT");
    }
    Ok(RunOutcome::Exited(code))
}

/// Report a failure that happened before any command ran
async fn reject(responder: &Responder, message: &str) -> i32 {
    // The peer may already be gone; there is nobody to tell.
    let _ = responder
        .send_stderr(Bytes::from(format!("ERROR: {}\n", message)))
        .await;
    let _ = responder.send_exit(EXIT_USAGE).await;
    let _ = responder.close().await;
    EXIT_USAGE
}

async fn wait_closed(closed: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    match closed.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone().unwrap_or(CloseReason::Eof),
        Err(_) => CloseReason::Aborted("decode loop stopped".to_string()),
    }
}
