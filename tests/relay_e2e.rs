//! End-to-end tests for the viewer WebSocket endpoint.
//!
//! Shell output is checked with arithmetic expansion (`echo hel$((0))lo`
//! prints `hel0lo`) so the terminal's echo of the typed line never matches.

mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use ptyhub::session::SessionSettings;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

fn tmp_dir() -> String {
    std::env::temp_dir().display().to_string()
}

#[tokio::test]
async fn test_session_message_then_command_output() {
    let server = TestServer::start().await;
    let query = format!(
        "id=web&cwd={}&cmd=echo%20hel%24%28%280%29%29lo",
        tmp_dir()
    );
    let (_tx, mut rx, id) = server.open(&query).await;

    read_until(&mut rx, "hel0lo").await;

    let session = server.sessions().get(&id).expect("registered");
    assert_eq!(session.project_id, "web");
    assert_eq!(session.command, "echo hel$((0))lo");
    assert!(session.is_attached());
    session.kill();
}

#[tokio::test]
async fn test_input_raw_and_binary_reach_shell() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, _id) = server.open("id=p").await;

    send_input(&mut tx, "echo in$((1+1))\r").await;
    read_until(&mut rx, "in2").await;

    // Not JSON: typed verbatim.
    tx.send(Message::Text("echo raw$((3))\r".into())).await.unwrap();
    read_until(&mut rx, "raw3").await;

    tx.send(Message::Binary(b"echo bin$((4))\r".to_vec().into()))
        .await
        .unwrap();
    read_until(&mut rx, "bin4").await;

    send_json(&mut tx, serde_json::json!({"type": "kill"})).await;
    read_exit(&mut rx).await;
}

#[tokio::test]
async fn test_unknown_json_is_ignored() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, id) = server.open("id=p").await;

    send_json(&mut tx, serde_json::json!({"type": "bogus", "data": "echo no$((9))\r"})).await;
    send_json(&mut tx, serde_json::json!({"type": "input", "data": 42})).await;
    send_input(&mut tx, "echo yes$((8))\r").await;

    let out = read_until(&mut rx, "yes8").await;
    assert!(!out.contains("no9"));
    assert!(server.sessions().get(&id).is_some());
    server.sessions().kill_all();
}

#[tokio::test]
async fn test_kill_sends_exit_then_closes() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, id) = server.open("id=p").await;

    send_json(&mut tx, serde_json::json!({"type": "kill"})).await;
    let exit = read_exit(&mut rx).await;
    assert!(exit.get("exitCode").is_some());
    assert!(exit.get("signal").is_some());
    assert_eq!(expect_close(&mut rx).await, "session exited");

    assert!(server.sessions().get(&id).is_none());
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_natural_exit_reports_code() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, id) = server.open("id=p").await;

    send_input(&mut tx, "exit 7\r").await;
    let exit = read_exit(&mut rx).await;
    assert_eq!(exit["exitCode"], 7);
    assert_eq!(exit["signal"], serde_json::Value::Null);
    expect_close(&mut rx).await;
    assert!(server.sessions().get(&id).is_none());
}

#[tokio::test]
async fn test_exit_by_signal_reports_signal() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, id) = server.open("id=p").await;

    send_input(&mut tx, "kill -KILL $$\r").await;
    let exit = read_exit(&mut rx).await;
    assert!(exit["signal"].is_string(), "no signal in {exit}");
    expect_close(&mut rx).await;
    assert!(server.sessions().get(&id).is_none());
}

#[tokio::test]
async fn test_reattach_keeps_shell_state() {
    let server = TestServer::start_with(SessionSettings {
        idle_timeout: Duration::from_secs(5),
        ..test_settings()
    })
    .await;
    let (mut tx, mut rx, id) = server.open("id=p").await;

    send_input(&mut tx, "MARK=ke$((1))pt; echo set$((0))\r").await;
    read_until(&mut rx, "set0").await;
    tx.close().await.unwrap();

    let session = server.sessions().get(&id).unwrap();
    assert!(eventually(Duration::from_secs(2), || session.has_eviction_timer()).await);

    let (mut tx, mut rx, reattached) = server.open(&format!("id=p&attach={}", id)).await;
    assert_eq!(reattached, id);
    assert!(!session.has_eviction_timer());
    assert_eq!(server.sessions().len(), 1);

    send_input(&mut tx, "echo $MARK\r").await;
    read_until(&mut rx, "ke1pt").await;
    session.kill();
}

#[tokio::test]
async fn test_stale_attach_creates_new_session() {
    let server = TestServer::start().await;
    let (_tx, _rx, id) = server.open("id=p&attach=no-such-session").await;
    assert_ne!(id, "no-such-session");
    assert!(server.sessions().get(&id).is_some());
    server.sessions().kill_all();
}

#[tokio::test]
async fn test_attach_to_killed_session_creates_new() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, first) = server.open("id=p").await;
    send_json(&mut tx, serde_json::json!({"type": "kill"})).await;
    read_exit(&mut rx).await;

    let (_tx, _rx, second) = server.open(&format!("id=p&attach={}", first)).await;
    assert_ne!(second, first);
    server.sessions().kill_all();
}

#[tokio::test]
async fn test_missing_cwd_falls_back() {
    let server = TestServer::start().await;
    let (_tx, _rx, id) = server.open("id=p&cwd=/definitely/not/here").await;
    let session = server.sessions().get(&id).expect("session created");
    assert_eq!(session.cwd, ptyhub::pty::fallback_dir());
    session.kill();
}

#[tokio::test]
async fn test_spawn_failure_sends_error_and_closes() {
    let server = TestServer::start_with(SessionSettings {
        shell: Some("/nonexistent/shell".to_string()),
        ..test_settings()
    })
    .await;
    let (_tx, mut rx) = server.connect("id=p").await;

    let msg = recv_json(&mut rx).await;
    assert_eq!(msg["type"], "error");
    assert!(!msg["text"].as_str().unwrap().is_empty());
    expect_close(&mut rx).await;
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_superseded_viewer_gets_no_output() {
    let server = TestServer::start().await;
    let (mut tx_a, mut rx_a, id) = server.open("id=p").await;
    let (mut tx_b, mut rx_b, id_b) = server.open(&format!("id=p&attach={}", id)).await;
    assert_eq!(id_b, id);

    send_input(&mut tx_b, "echo sup$((2))\r").await;
    read_until(&mut rx_b, "sup2").await;

    // The first connection stays open and its input still reaches the
    // shell, but output only goes to the current viewer.
    send_input(&mut tx_a, "echo froma$((5))\r").await;
    read_until(&mut rx_b, "froma5").await;

    let mut leaked = String::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_millis(500), rx_a.next()).await {
        if let Message::Text(text) = msg {
            leaked.push_str(text.as_str());
        }
    }
    assert!(!leaked.contains("sup2"), "superseded viewer saw output: {leaked}");
    assert!(!leaked.contains("froma5"), "superseded viewer saw output: {leaked}");

    // Closing the superseded connection leaves the session attached.
    tx_a.close().await.unwrap();
    let session = server.sessions().get(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.is_attached());
    assert!(!session.has_eviction_timer());

    send_json(&mut tx_b, serde_json::json!({"type": "kill"})).await;
    read_exit(&mut rx_b).await;
}

#[tokio::test]
async fn test_idle_session_is_evicted() {
    let server = TestServer::start().await;
    let (mut tx, _rx, id) = server.open("id=p").await;
    let session = server.sessions().get(&id).unwrap();
    tx.close().await.unwrap();

    assert!(eventually(Duration::from_secs(3), || server.sessions().get(&id).is_none()).await);
    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("evicted shell exits");
}

#[tokio::test]
async fn test_resize_messages() {
    let server = TestServer::start().await;
    let (mut tx, _rx, id) = server.open("id=p").await;
    let session = server.sessions().get(&id).unwrap();

    send_json(&mut tx, serde_json::json!({"type": "resize", "cols": 100, "rows": 40})).await;
    assert!(eventually(Duration::from_secs(2), || session.size() == Some((100, 40))).await);

    send_json(&mut tx, serde_json::json!({"type": "resize", "cols": "x"})).await;
    assert!(eventually(Duration::from_secs(2), || session.size() == Some((120, 30))).await);
    session.kill();
}

#[tokio::test]
async fn test_sigint_interrupts_foreground_command() {
    let server = TestServer::start().await;
    let (mut tx, mut rx, _id) = server.open("id=p").await;

    send_input(&mut tx, "sleep 30\r").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    send_json(&mut tx, serde_json::json!({"type": "signal", "signal": "SIGINT"})).await;
    send_input(&mut tx, "echo int$((6*7))\r").await;
    read_until(&mut rx, "int42").await;
    server.sessions().kill_all();
}

#[tokio::test]
async fn test_server_shutdown_closes_viewers() {
    let server = TestServer::start().await;
    let (_tx, mut rx, id) = server.open("id=p").await;
    let session = server.sessions().get(&id).unwrap();

    server.state.shutdown.shutdown();
    assert_eq!(expect_close(&mut rx).await, "server shutting down");

    // The handler detached on its way out.
    assert!(eventually(Duration::from_secs(2), || !session.is_attached()).await);
    session.kill();
}

#[tokio::test]
async fn test_viewer_after_shutdown_is_closed() {
    let server = TestServer::start().await;
    server.state.shutdown.shutdown();

    let (_tx, mut rx) = server.connect("id=p").await;
    assert_eq!(expect_close(&mut rx).await, "server shutting down");
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_registry_shutdown_refuses_new_viewers() {
    let server = TestServer::start().await;
    let (_tx, mut rx, _id) = server.open("id=p").await;

    server.sessions().shutdown().await;
    read_exit(&mut rx).await;
    assert!(server.sessions().is_empty());

    let (_tx, mut rx) = server.connect("id=p").await;
    let msg = recv_json(&mut rx).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["text"], "server is shutting down");
    expect_close(&mut rx).await;
}

#[tokio::test]
async fn test_viewers_get_independent_sessions() {
    let server = TestServer::start().await;
    let (_tx_a, _rx_a, a) = server.open("id=same").await;
    let (_tx_b, _rx_b, b) = server.open("id=same").await;
    assert_ne!(a, b);
    assert_eq!(server.sessions().len(), 2);
    server.sessions().kill_all();
}
