use async_trait::async_trait;
use remcli_auth::{Credential, HttpAuthConfig, HttpAuthenticator, Principal};
use remcli_client::{run_session, ClientError, RemoteCli, SessionOptions, EXIT_REJECTED};
use remcli_proto::Completion;
use remcli_server::{
    run_connection, BuiltinCommands, CliConnectionHandler, CommandContext, CommandDispatcher,
    CommandIo, DispatchError, RunOutcome, RunnerConfig,
};
use remcli_tunnel::{
    ConnectionHandler, DuplexChannel, TunnelClient, TunnelServer, TunnelServerConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

async fn start_server(auth: HttpAuthConfig, handler: Arc<dyn ConnectionHandler>) -> SocketAddr {
    let server = TunnelServer::new(
        TunnelServerConfig::default(),
        HttpAuthenticator::from_config(&auth),
        handler,
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

async fn start(auth: HttpAuthConfig, dispatcher: Arc<dyn CommandDispatcher>) -> String {
    let handler = Arc::new(CliConnectionHandler::new(dispatcher, RunnerConfig::default()));
    format!("http://{}", start_server(auth, handler).await)
}

struct Output {
    stdout: DuplexStream,
    stderr: DuplexStream,
}

impl Output {
    async fn read(mut self) -> (String, String) {
        let mut out = String::new();
        let mut err = String::new();
        self.stdout.read_to_string(&mut out).await.unwrap();
        self.stderr.read_to_string(&mut err).await.unwrap();
        (out, err)
    }
}

async fn execute(
    cli: &RemoteCli,
    args: &[&str],
    stdin: &'static [u8],
) -> (Result<i32, ClientError>, Output) {
    let (stdout, stdout_rx) = tokio::io::duplex(1024 * 1024);
    let (stderr, stderr_rx) = tokio::io::duplex(64 * 1024);
    let options = SessionOptions::new(args.iter().map(|a| a.to_string()).collect());
    let result = cli.execute(&options, stdin, stdout, stderr).await;
    (
        result,
        Output {
            stdout: stdout_rx,
            stderr: stderr_rx,
        },
    )
}

#[tokio::test]
async fn test_echo_and_cat() {
    let url = start(HttpAuthConfig::None, Arc::new(BuiltinCommands::new())).await;
    let cli = RemoteCli::new(TunnelClient::builder(url).build().unwrap());

    let (result, output) = execute(&cli, &["echo", "hello", "world"], b"").await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output.read().await.0, "hello world\n");

    let (result, output) = execute(&cli, &["cat"], b"piped through\nthe tunnel\n").await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output.read().await.0, "piped through\nthe tunnel\n");
}

#[tokio::test]
async fn test_unknown_command_exits_2() {
    let url = start(HttpAuthConfig::None, Arc::new(BuiltinCommands::new())).await;
    let cli = RemoteCli::new(TunnelClient::builder(url).build().unwrap());

    let (result, output) = execute(&cli, &["frobnicate"], b"").await;
    assert_eq!(result.unwrap(), 2);
    let (_, stderr) = output.read().await;
    assert!(stderr.contains("No such command frobnicate"), "{}", stderr);
}

#[tokio::test]
async fn test_authenticated_identity() {
    let url = start(
        HttpAuthConfig::BearerToken {
            tokens: vec!["deploy-bot:s3cret".to_string()],
        },
        Arc::new(BuiltinCommands::new()),
    )
    .await;

    let denied = RemoteCli::new(TunnelClient::builder(url.clone()).build().unwrap());
    let (result, _) = execute(&denied, &["who-am-i"], b"").await;
    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), EXIT_REJECTED);

    let credential = Credential::bearer_from_arg("s3cret").unwrap();
    let allowed = RemoteCli::new(
        TunnelClient::builder(url)
            .credential(&credential)
            .build()
            .unwrap(),
    );
    let (result, output) = execute(&allowed, &["who-am-i"], b"").await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(
        output.read().await.0,
        "Authenticated as: deploy-bot\nScheme: bearer\n"
    );
}

struct ExitWith(i32);

#[async_trait]
impl CommandDispatcher for ExitWith {
    async fn dispatch(
        &self,
        _context: CommandContext,
        _io: CommandIo,
    ) -> Result<i32, DispatchError> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn test_exit_code_is_verbatim() {
    let url = start(HttpAuthConfig::None, Arc::new(ExitWith(42))).await;
    let cli = RemoteCli::new(TunnelClient::builder(url).build().unwrap());

    let (result, _) = execute(&cli, &["anything"], b"").await;
    assert_eq!(result.unwrap(), 42);
}

/// Runs until cancelled; reports when it starts and when it is dropped
struct Hang {
    started: mpsc::UnboundedSender<()>,
    cancelled: mpsc::UnboundedSender<()>,
}

struct CancelGuard(mpsc::UnboundedSender<()>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

#[async_trait]
impl CommandDispatcher for Hang {
    async fn dispatch(
        &self,
        _context: CommandContext,
        _io: CommandIo,
    ) -> Result<i32, DispatchError> {
        let _guard = CancelGuard(self.cancelled.clone());
        let _ = self.started.send(());
        std::future::pending::<()>().await;
        Ok(0)
    }
}

/// Runs each connection and reports how it ended
struct RecordingHandler {
    dispatcher: Arc<dyn CommandDispatcher>,
    outcomes: mpsc::UnboundedSender<RunOutcome>,
}

#[async_trait]
impl ConnectionHandler for RecordingHandler {
    async fn handle(&self, channel: DuplexChannel, principal: Principal) {
        let (reader, writer) = channel.into_split();
        let outcome = run_connection(
            reader,
            writer,
            principal,
            self.dispatcher.clone(),
            &RunnerConfig::default(),
        )
        .await
        .unwrap();
        let _ = self.outcomes.send(outcome);
    }
}

struct HangingServer {
    addr: SocketAddr,
    started: mpsc::UnboundedReceiver<()>,
    cancelled: mpsc::UnboundedReceiver<()>,
    outcomes: mpsc::UnboundedReceiver<RunOutcome>,
}

async fn start_hanging_server() -> HangingServer {
    let (started_tx, started) = mpsc::unbounded_channel();
    let (cancelled_tx, cancelled) = mpsc::unbounded_channel();
    let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
    let handler = Arc::new(RecordingHandler {
        dispatcher: Arc::new(Hang {
            started: started_tx,
            cancelled: cancelled_tx,
        }),
        outcomes: outcomes_tx,
    });
    HangingServer {
        addr: start_server(HttpAuthConfig::None, handler).await,
        started,
        cancelled,
        outcomes,
    }
}

/// TCP relay whose connections can all be cut at once
async fn start_relay(upstream: SocketAddr) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (cut, mut cut_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut links = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut cut_rx => break,
                accepted = listener.accept() => {
                    let Ok((mut inbound, _)) = accepted else { break };
                    links.spawn(async move {
                        let mut outbound = TcpStream::connect(upstream).await.unwrap();
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    });
                }
            }
        }
        links.shutdown().await;
    });
    (url, cut)
}

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_dropping_execute_cancels_remote_command() {
    let mut server = start_hanging_server().await;
    let cli = RemoteCli::new(
        TunnelClient::builder(format!("http://{}", server.addr))
            .build()
            .unwrap(),
    );

    let execute = execute(&cli, &["hang"], b"");
    tokio::select! {
        _ = execute => panic!("command should not finish"),
        started = server.started.recv() => assert!(started.is_some()),
    }

    let cancelled = tokio::time::timeout(WAIT, server.cancelled.recv())
        .await
        .expect("remote command still running after the client went away");
    assert!(cancelled.is_some());
    let outcome = tokio::time::timeout(WAIT, server.outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Cancelled(_)), "{:?}", outcome);
}

#[tokio::test]
async fn test_broken_legs_close_both_sides() {
    let mut server = start_hanging_server().await;
    let (url, cut) = start_relay(server.addr).await;

    let channel = TunnelClient::builder(url)
        .build()
        .unwrap()
        .connect()
        .await
        .unwrap();
    let (reader, writer) = channel.into_split();
    let session = tokio::spawn(async move {
        run_session(
            reader,
            writer,
            &SessionOptions::new(vec!["hang".to_string()]),
            tokio::io::empty(),
            tokio::io::sink(),
            tokio::io::sink(),
        )
        .await
    });

    server.started.recv().await.unwrap();
    cut.send(()).unwrap();

    let completion = tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    assert!(
        matches!(completion, Completion::Closed(_)),
        "{:?}",
        completion
    );
    assert!(completion.exit_code().is_err());

    let outcome = tokio::time::timeout(WAIT, server.outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Cancelled(_)), "{:?}", outcome);
    assert!(server.cancelled.recv().await.is_some());
}
