#![allow(dead_code)]

use futures::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use ptyhub::api::{self, AppState, RouterConfig};
use ptyhub::session::{SessionRegistry, SessionSettings};
use ptyhub::shutdown::ShutdownCoordinator;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsTx = SplitSink<Ws, Message>;
pub type WsRx = SplitStream<Ws>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Fast settings with a plain, non-login `/bin/sh` so tests do not depend
/// on the user's shell profile.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        idle_timeout: Duration::from_millis(500),
        command_delay: Duration::from_millis(50),
        kill_grace: Duration::from_secs(1),
        shell: Some("/bin/sh".to_string()),
        login_shell: false,
        extra_path: vec![],
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_settings()).await
    }

    pub async fn start_with(settings: SessionSettings) -> Self {
        let state = AppState {
            sessions: SessionRegistry::with_settings(settings),
            shutdown: ShutdownCoordinator::new(),
            default_command: String::new(),
        };
        let app = api::router(state.clone(), RouterConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        Self { addr, state }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.state.sessions
    }

    /// Connect a viewer. `query` is appended verbatim after `?`.
    pub async fn connect(&self, query: &str) -> (WsTx, WsRx) {
        let url = format!("ws://{}/?{}", self.addr, query);
        let (ws, _) = connect_async(url).await.expect("viewer connect");
        ws.split()
    }

    /// Connect and consume the `session` message, returning its id.
    pub async fn open(&self, query: &str) -> (WsTx, WsRx, String) {
        let (tx, mut rx) = self.connect(query).await;
        let msg = recv_json(&mut rx).await;
        assert_eq!(msg["type"], "session", "unexpected first message: {msg}");
        let id = msg["sessionId"].as_str().expect("sessionId").to_string();
        (tx, rx, id)
    }
}

/// Receive the next text frame as JSON.
pub async fn recv_json(rx: &mut WsRx) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text message, got {:?}", other),
        }
    }
}

/// Accumulate `stdout` text until `needle` appears.
pub async fn read_until(rx: &mut WsRx, needle: &str) -> String {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    let mut out = String::new();
    while tokio::time::Instant::now() < deadline {
        let msg = recv_json(rx).await;
        if msg["type"] == "stdout" {
            out.push_str(msg["text"].as_str().unwrap_or_default());
            if out.contains(needle) {
                return out;
            }
        }
    }
    panic!("did not see {needle:?} in output: {out:?}");
}

/// Skip output until `exit`, returning that message.
pub async fn read_exit(rx: &mut WsRx) -> serde_json::Value {
    loop {
        let msg = recv_json(rx).await;
        if msg["type"] == "exit" {
            return msg;
        }
    }
}

/// Wait for the server to close the connection. Returns the close reason,
/// or an empty string if the stream ended without a close frame.
pub async fn expect_close(rx: &mut WsRx) -> String {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .expect("timeout waiting for close")
        {
            Some(Ok(Message::Close(frame))) => {
                return frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return String::new(),
        }
    }
}

pub async fn send_json(tx: &mut WsTx, value: serde_json::Value) {
    tx.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn send_input(tx: &mut WsTx, data: &str) {
    send_json(tx, serde_json::json!({"type": "input", "data": data})).await;
}

/// Poll `cond` every 20ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
