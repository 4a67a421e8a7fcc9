use async_trait::async_trait;
use bytes::Bytes;
use remcli_client::{run_session, SessionOptions};
use remcli_proto::{
    run_responder, CloseReason, Completion, FrameSender, InvocationCollector, Responder,
    ResponderHandler, StartSignal,
};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

/// One pipe per direction, so either side can hang up independently
struct Wires {
    client_read: DuplexStream,
    client_write: DuplexStream,
    server_read: DuplexStream,
    server_write: DuplexStream,
}

fn wires() -> Wires {
    let (client_write, server_read) = tokio::io::duplex(64 * 1024);
    let (server_write, client_read) = tokio::io::duplex(64 * 1024);
    Wires {
        client_read,
        client_write,
        server_read,
        server_write,
    }
}

#[tokio::test]
async fn test_invocation_round_trip() {
    let Wires {
        client_read,
        client_write,
        server_read,
        server_write,
    } = wires();
    let server = tokio::spawn(async move {
        let responder = Responder::new(FrameSender::new(server_write));
        let (mut collector, mut handle) = InvocationCollector::new();
        tokio::spawn(async move { run_responder(server_read, &mut collector).await });

        let invocation = match handle.start.await.unwrap() {
            StartSignal::Started(invocation) => invocation,
            other => panic!("unexpected {:?}", other),
        };
        let mut input = Vec::new();
        handle.stdin.read_to_end(&mut input).await.unwrap();
        responder.send_stdout(Bytes::from(input)).await.unwrap();
        responder
            .send_stderr(Bytes::from_static(b"warning\n"))
            .await
            .unwrap();
        responder.send_exit(7).await.unwrap();
        invocation
    });

    let input: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let (stdout, mut stdout_rx) = tokio::io::duplex(1024 * 1024);
    let (stderr, mut stderr_rx) = tokio::io::duplex(1024);
    let options = SessionOptions {
        args: vec!["build".to_string(), "job".to_string()],
        locale: Some("en_US".to_string()),
        ..Default::default()
    };

    let completion = run_session(
        client_read,
        client_write,
        &options,
        std::io::Cursor::new(input.clone()),
        stdout,
        stderr,
    )
    .await;
    assert_eq!(completion, Completion::Exited(7));

    let invocation = server.await.unwrap();
    assert_eq!(invocation.args, vec!["build", "job"]);
    assert_eq!(invocation.encoding.as_deref(), Some("UTF-8"));
    assert_eq!(invocation.locale.as_deref(), Some("en_US"));

    let mut out = Vec::new();
    stdout_rx.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, input);
    let mut err = Vec::new();
    stderr_rx.read_to_end(&mut err).await.unwrap();
    assert_eq!(err, b"warning\n");
}

#[tokio::test]
async fn test_close_without_exit_is_not_an_exit_code() {
    let Wires {
        client_read,
        client_write,
        server_read,
        server_write,
    } = wires();
    tokio::spawn(async move {
        let (mut collector, handle) = InvocationCollector::new();
        tokio::spawn(async move { run_responder(server_read, &mut collector).await });
        let _ = handle.start.await;
        // hang up without EXIT
        drop(server_write);
    });

    let completion = run_session(
        client_read,
        client_write,
        &SessionOptions::new(vec!["who-am-i".to_string()]),
        tokio::io::empty(),
        tokio::io::sink(),
        tokio::io::sink(),
    )
    .await;

    assert_eq!(completion, Completion::Closed(CloseReason::Eof));
    assert!(completion.exit_code().is_err());
}

/// Reports every ENCODING frame seen after START
struct PingCounter {
    started: bool,
    pings: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ResponderHandler for PingCounter {
    async fn on_arg(&mut self, _arg: String) {}

    async fn on_locale(&mut self, _locale: String) {}

    async fn on_encoding(&mut self, encoding: String) {
        if self.started {
            let _ = self.pings.send(encoding);
        }
    }

    async fn on_start(&mut self) {
        self.started = true;
    }

    async fn on_stdin(&mut self, _chunk: Bytes) -> io::Result<()> {
        Ok(())
    }

    async fn on_end_stdin(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn handle_close(&mut self, _reason: CloseReason) {}
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_until_exit() {
    let Wires {
        client_read,
        client_write,
        server_read,
        server_write,
    } = wires();
    let (pings, mut ping_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut counter = PingCounter {
            started: false,
            pings,
        };
        run_responder(server_read, &mut counter).await;
    });
    let responder = Responder::new(FrameSender::new(server_write));
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            assert_eq!(ping_rx.recv().await.as_deref(), Some("UTF-8"));
        }
        responder.send_exit(0).await.unwrap();
    });

    let options = SessionOptions {
        ping_interval: Some(Duration::from_secs(3)),
        ..SessionOptions::new(vec!["help".to_string()])
    };
    let completion = run_session(
        client_read,
        client_write,
        &options,
        tokio::io::empty(),
        tokio::io::sink(),
        tokio::io::sink(),
    )
    .await;

    assert_eq!(completion, Completion::Exited(0));
    server.await.unwrap();
}

#[tokio::test]
async fn test_abandoned_session_closes_the_channel() {
    let Wires {
        client_read,
        client_write,
        server_read,
        server_write,
    } = wires();
    let (mut collector, handle) = InvocationCollector::new();
    tokio::spawn(async move { run_responder(server_read, &mut collector).await });

    // stdin that never ends keeps the pump alive until the session is dropped
    let (_stdin_tx, stdin) = tokio::io::duplex(64);
    let session = tokio::spawn(async move {
        run_session(
            client_read,
            client_write,
            &SessionOptions::new(vec!["hang".to_string()]),
            stdin,
            tokio::io::sink(),
            tokio::io::sink(),
        )
        .await
    });

    assert!(matches!(
        handle.start.await.unwrap(),
        StartSignal::Started(_)
    ));
    session.abort();

    let mut closed = handle.closed;
    let reason = tokio::time::timeout(
        Duration::from_secs(5),
        closed.wait_for(Option::is_some),
    )
    .await
    .expect("responder never saw the connection close")
    .unwrap()
    .clone();
    assert_eq!(reason, Some(CloseReason::Eof));
    drop(server_write);
}
