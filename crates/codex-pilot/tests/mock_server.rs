use codex_pilot::transport::frame::{FrameDecoder, Opcode, encode_frame};
use codex_pilot::{ConnectionStatus, PersonaMood, PilotClient, PilotConfig, Snapshot};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};

const WAIT: Duration = Duration::from_secs(10);

/// Server side of one upgraded socket.
struct MockPeer {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl MockPeer {
    async fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.expect("handshake byte");
            head.push(byte[0]);
        }
        let request = String::from_utf8_lossy(&head).to_string();
        assert!(request.contains("Upgrade: websocket"));
        assert!(!request.contains("Sec-WebSocket-Extensions"));

        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Accept: mock\r\n\r\n",
            )
            .await
            .expect("write upgrade");
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    async fn recv(&mut self) -> Value {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next_frame().expect("client frame") {
                assert_eq!(frame.opcode, Opcode::Text);
                return serde_json::from_slice(&frame.payload).expect("json frame");
            }
            let count = self.stream.read(&mut buf).await.expect("read");
            assert!(count > 0, "client closed the socket");
            self.decoder.extend(&buf[..count]);
        }
    }

    async fn send(&mut self, message: Value) {
        let bytes = encode_frame(Opcode::Text, message.to_string().as_bytes(), None);
        self.stream.write_all(&bytes).await.expect("write frame");
    }

    /// Answer `initialize` and the four follow-up reads.
    async fn complete_handshake(&mut self) -> i64 {
        let init = self.recv().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["clientInfo"]["name"], "codex-pilot");
        self.send(json!({"jsonrpc": "2.0", "id": init["id"], "result": {"userAgent": "mock"}}))
            .await;

        for _ in 0..4 {
            let request = self.recv().await;
            let result = match request["method"].as_str() {
                Some("thread/list") => json!({"data": [{
                    "id": "t1",
                    "preview": "fix the flaky test",
                    "status": {"type": "idle"},
                    "createdAt": 1_700_000_000
                }]}),
                Some("thread/loaded/list") => json!({"data": ["t1"]}),
                Some("account/read") => json!({"account": {
                    "type": "chatgpt",
                    "email": "pilot@example.com",
                    "planType": "pro"
                }}),
                Some("account/rateLimits/read") => json!({"rateLimits": {
                    "primary": {"usedPercent": 42.0, "windowDurationMins": 300}
                }}),
                other => panic!("unexpected follow-up: {other:?}"),
            };
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
                .await;
        }
        init["id"].as_i64().expect("numeric id")
    }
}

async fn wait_until<F>(client: &PilotClient, predicate: F) -> Snapshot
where
    F: FnMut(&Snapshot) -> bool,
{
    timeout(WAIT, client.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("runtime alive")
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    (listener, url)
}

#[tokio::test]
async fn session_projects_threads_and_auto_approves() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = MockPeer::accept(&listener).await;
        peer.complete_handshake().await;

        peer.send(json!({
            "jsonrpc": "2.0",
            "method": "turn/started",
            "params": {"threadId": "t1", "turn": {"id": "turn-1"}}
        }))
        .await;
        peer.send(json!({
            "jsonrpc": "2.0",
            "id": "srv-1",
            "method": "item/commandExecution/requestApproval",
            "params": {"threadId": "t1", "command": "cargo test"}
        }))
        .await;
        let reply = peer.recv().await;
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["result"]["decision"], "accept");

        peer.send(json!({
            "jsonrpc": "2.0",
            "method": "turn/completed",
            "params": {"threadId": "t1", "turn": {"id": "turn-1"}}
        }))
        .await;
        peer
    });

    let client = PilotClient::spawn(PilotConfig::default().with_url(url)).expect("spawn");
    client.connect().expect("connect");

    let snapshot = wait_until(&client, |s| {
        s.persona("t1")
            .is_some_and(|persona| persona.mood == PersonaMood::Done)
    })
    .await;

    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    let thread = snapshot.thread("t1").expect("thread t1");
    assert_eq!(thread.display_name(), "fix the flaky test");
    assert!(thread.loaded);
    assert!(!thread.has_active_turn);
    assert_eq!(
        snapshot.account.as_ref().and_then(|a| a.email.as_deref()),
        Some("pilot@example.com")
    );
    assert_eq!(
        snapshot.rate_limits.as_ref().and_then(|r| r.used_percent),
        Some(42.0)
    );
    assert!(
        snapshot
            .events
            .iter()
            .any(|event| event.summary.contains("Auto-approved"))
    );

    let _peer = timeout(WAIT, server).await.expect("server done").expect("server task");
    client.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_server_drop_with_fresh_ids() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut first = MockPeer::accept(&listener).await;
        let first_id = first.complete_handshake().await;
        drop(first);

        let mut second = MockPeer::accept(&listener).await;
        let second_id = second.complete_handshake().await;
        (first_id, second_id, second)
    });

    let config = PilotConfig::default().with_url(url).with_reconnect_delay(1);
    let client = PilotClient::spawn(config).expect("spawn");
    let mut snapshots = client.subscribe();
    client.connect().expect("connect");

    let dropped = timeout(
        WAIT,
        snapshots.wait_for(|s| {
            s.status == ConnectionStatus::Disconnected && s.last_error.is_some()
        }),
    )
    .await
    .expect("timed out waiting for drop")
    .expect("runtime alive")
    .clone();
    assert_eq!(dropped.last_error.as_deref(), Some("Server closed connection"));
    assert!(dropped.threads.is_empty());

    let (first_id, second_id, _peer) = timeout(WAIT, server)
        .await
        .expect("server done")
        .expect("server task");
    assert_eq!(first_id, 1);
    assert_eq!(second_id, 6);

    let snapshot = wait_until(&client, |s| {
        s.status == ConnectionStatus::Connected && !s.threads.is_empty()
    })
    .await;
    assert!(snapshot.last_error.is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn rejected_upgrade_reports_an_error() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await
            .expect("write");
        stream
    });

    let client = PilotClient::spawn(PilotConfig::default().with_url(url)).expect("spawn");
    client.connect().expect("connect");

    let snapshot = wait_until(&client, |s| s.last_error.is_some()).await;
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(
        snapshot
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("400"))
    );

    let _stream = server.await.expect("server task");
    client.shutdown().await;
}
