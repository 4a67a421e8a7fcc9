//! Initiator side of one invocation

use remcli_proto::{
    run_initiator, CloseReason, Completion, FrameSender, Initiator, InitiatorSession,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Interval of the ENCODING frames keeping idle legs alive
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3);

/// What to run and how to describe the local terminal
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub args: Vec<String>,
    pub encoding: Option<String>,
    pub locale: Option<String>,
    /// `None` disables keep-alive pings
    pub ping_interval: Option<Duration>,
}

impl SessionOptions {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            encoding: Some("UTF-8".to_string()),
            locale: None,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
        }
    }
}

/// Run one invocation over an established byte channel
///
/// Sends the arguments and START, copies `stdin` into STDIN frames, writes
/// STDOUT/STDERR to the given sinks and returns once EXIT arrives or the
/// connection closes.
///
/// Every task started here belongs to the returned future. Dropping it
/// aborts them, which closes both halves of the channel.
pub async fn run_session<R, W, I, O, E>(
    reader: R,
    writer: W,
    options: &SessionOptions,
    stdin: I,
    stdout: O,
    stderr: E,
) -> Completion
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin + Send + 'static,
{
    let initiator = Initiator::new(FrameSender::new(writer));
    let (mut session, completion) = InitiatorSession::new(stdout, stderr);
    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        run_initiator(reader, &mut session).await;
    });

    // A failed write still ends in EXIT or close on the read side
    match initiator
        .start(
            &options.args,
            options.encoding.as_deref(),
            options.locale.as_deref(),
        )
        .await
    {
        Ok(()) => debug!("Sent {} argument(s) and START", options.args.len()),
        Err(e) => warn!("Failed to send the invocation: {}", e),
    }

    {
        let initiator = initiator.clone();
        tasks.spawn(async move {
            if let Err(e) = initiator.pump_stdin(stdin).await {
                debug!("stdin pump stopped: {}", e);
            }
        });
    }

    if let Some(interval) = options.ping_interval {
        let initiator = initiator.clone();
        let encoding = options
            .encoding
            .clone()
            .unwrap_or_else(|| "UTF-8".to_string());
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = initiator.send_encoding(&encoding).await {
                    debug!("ping failed: {}", e);
                    break;
                }
            }
        });
    }

    let completion = completion.await.unwrap_or_else(|_| {
        Completion::Closed(CloseReason::Aborted("decode loop stopped".to_string()))
    });

    tasks.shutdown().await;
    if let Err(e) = initiator.close().await {
        debug!("closing the channel failed: {}", e);
    }

    match &completion {
        Completion::Exited(code) => debug!("Remote command exited with {}", code),
        Completion::Closed(reason) => debug!("Connection closed without EXIT: {}", reason),
    }
    completion
}
