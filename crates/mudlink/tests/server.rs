//! Integration tests for the server, handler, and full connection flow.
//!
//! A real listener and real WebSocket clients, with JWTs signed the way
//! the login service signs them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use mudlink::prelude::*;
use mudlink::WsConnectionManager;
use mudlink_session::Claims;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const SECRET: &[u8] = b"integration-secret";

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: String,
    manager: Arc<WsConnectionManager<MemoryStore>>,
    commands: mpsc::Receiver<PlayerCommand>,
    store: Arc<MemoryStore>,
}

// =========================================================================
// Helpers
// =========================================================================

fn test_config() -> ManagerConfig {
    ManagerConfig {
        audit_dir: std::env::temp_dir().join(format!("mudlink-server-tests-{}", std::process::id())),
        environment: "test".into(),
        ..ManagerConfig::default()
    }
}

/// Starts a server on a random port.
async fn start_server(config: ManagerConfig) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let mut server = MudlinkServer::builder()
        .bind("127.0.0.1:0")
        .config(config)
        .store(Arc::clone(&store))
        .build(JwtDecoder::new(SECRET))
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let manager = server.manager();
    let commands = server.take_commands().expect("commands available once");

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer {
        addr,
        manager,
        commands,
        store,
    }
}

fn add_player(store: &MemoryStore, user_id: &str, room: Option<&str>) -> PlayerId {
    let player_id = PlayerId::new_v4();
    store.insert_player(PlayerRecord {
        player_id,
        user_id: user_id.to_string(),
        name: user_id.to_uppercase(),
        current_room_id: room.map(RoomId::new),
        last_active_ms: None,
    });
    player_id
}

fn token_for(user_id: &str) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    let claims = Claims {
        sub: Some(user_id.to_string()),
        exp,
        iat: None,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET))
        .expect("token should encode")
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send_frame(ws: &mut ClientWs, frame: Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("send should succeed");
}

/// Receives the next text frame as JSON.
async fn next_event(ws: &mut ClientWs) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("should receive within timeout")
            .expect("stream should not end")
            .expect("frame should be valid");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).expect("server sends JSON");
        }
    }
}

/// Waits until the server closes the socket.
async fn expect_closed(ws: &mut ClientWs) {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("should close within timeout");
        match next {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}

/// Connects and completes a handshake. Returns the socket and the
/// `connected` event.
async fn login(addr: &str, user_id: &str, session_id: Option<&str>) -> (ClientWs, Value) {
    let mut ws = connect(addr).await;
    let mut frame = json!({ "type": "handshake", "token": token_for(user_id) });
    if let Some(session_id) = session_id {
        frame["session_id"] = json!(session_id);
    }
    send_frame(&mut ws, frame).await;
    let connected = next_event(&mut ws).await;
    assert_eq!(connected["event_type"], "connected", "got {connected}");
    (ws, connected)
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_valid_token_receives_connected_event() {
    let server = start_server(test_config()).await;
    let p = add_player(&server.store, "alice", None);

    let (_ws, connected) = login(&server.addr, "alice", None).await;

    assert_eq!(connected["player_id"], p.to_string());
    assert_eq!(connected["data"]["player_id"], p.to_string());
    assert!(connected["data"]["session_id"].is_string());
    assert!(server.manager.is_online(&p).await);
}

#[tokio::test]
async fn test_handshake_bad_token_gets_auth_failed_and_close() {
    let server = start_server(test_config()).await;
    add_player(&server.store, "alice", None);
    let mut ws = connect(&server.addr).await;

    send_frame(&mut ws, json!({ "type": "handshake", "token": "not-a-jwt" })).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["event_type"], "error");
    assert_eq!(event["data"]["error_type"], "auth_failed");
    expect_closed(&mut ws).await;
    assert_eq!(server.manager.connection_count().await, 0);
}

#[tokio::test]
async fn test_handshake_unknown_account_gets_auth_failed() {
    let server = start_server(test_config()).await;
    let mut ws = connect(&server.addr).await;

    send_frame(&mut ws, json!({ "type": "handshake", "token": token_for("ghost") })).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["data"]["error_type"], "auth_failed");
}

#[tokio::test]
async fn test_first_frame_not_handshake_gets_handshake_required() {
    let server = start_server(test_config()).await;
    let mut ws = connect(&server.addr).await;

    send_frame(&mut ws, json!({ "type": "ping" })).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["data"]["error_type"], "handshake_required");
}

// =========================================================================
// Frame loop
// =========================================================================

#[tokio::test]
async fn test_ping_receives_pong() {
    let server = start_server(test_config()).await;
    add_player(&server.store, "alice", None);
    let (mut ws, _) = login(&server.addr, "alice", None).await;

    send_frame(&mut ws, json!({ "type": "ping" })).await;

    assert_eq!(next_event(&mut ws).await["event_type"], "pong");
}

#[tokio::test]
async fn test_command_is_forwarded_to_game_layer() {
    let mut server = start_server(test_config()).await;
    let p = add_player(&server.store, "alice", None);
    let (mut ws, connected) = login(&server.addr, "alice", None).await;

    send_frame(
        &mut ws,
        json!({ "type": "command", "command": "say", "args": ["hello", "world"] }),
    )
    .await;

    let command = tokio::time::timeout(Duration::from_secs(2), server.commands.recv())
        .await
        .expect("command should arrive")
        .expect("channel open");
    assert_eq!(command.player_id, p);
    assert_eq!(command.command, "say");
    assert_eq!(command.args, vec!["hello", "world"]);
    assert_eq!(
        command.connection_id.as_str(),
        connected["data"]["connection_id"].as_str().unwrap()
    );
}

#[tokio::test]
async fn test_command_over_rate_limit_gets_rate_limited() {
    let config = ManagerConfig {
        rate_limit_messages: 1,
        ..test_config()
    };
    let server = start_server(config).await;
    add_player(&server.store, "alice", None);
    let (mut ws, _) = login(&server.addr, "alice", None).await;

    send_frame(&mut ws, json!({ "type": "command", "command": "look" })).await;
    send_frame(&mut ws, json!({ "type": "command", "command": "look" })).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["data"]["error_type"], "rate_limited");
}

#[tokio::test]
async fn test_garbage_frame_gets_invalid_frame() {
    let server = start_server(test_config()).await;
    add_player(&server.store, "alice", None);
    let (mut ws, _) = login(&server.addr, "alice", None).await;

    ws.send(Message::text("{not json")).await.unwrap();

    assert_eq!(next_event(&mut ws).await["data"]["error_type"], "invalid_frame");
}

#[tokio::test]
async fn test_client_disconnect_frame_takes_player_offline() {
    let server = start_server(test_config()).await;
    let p = add_player(&server.store, "alice", None);
    let (mut ws, _) = login(&server.addr, "alice", None).await;

    send_frame(&mut ws, json!({ "type": "disconnect", "reason": "bye" })).await;

    let manager = Arc::clone(&server.manager);
    assert!(eventually(|| {
        let manager = Arc::clone(&manager);
        async move { !manager.is_online(&p).await }
    })
    .await);
}

// =========================================================================
// Sessions and delivery over real sockets
// =========================================================================

#[tokio::test]
async fn test_second_login_without_session_kicks_first_socket() {
    let server = start_server(test_config()).await;
    let p = add_player(&server.store, "alice", None);
    let (mut first, _) = login(&server.addr, "alice", None).await;

    let (_second, _) = login(&server.addr, "alice", None).await;

    let notice = next_event(&mut first).await;
    assert_eq!(notice["event_type"], "disconnected");
    assert_eq!(notice["data"]["reason"], "new game session established");
    expect_closed(&mut first).await;
    assert_eq!(server.manager.connections_for_player(&p).await.len(), 1);
}

#[tokio::test]
async fn test_same_session_second_tab_keeps_both_sockets() {
    let server = start_server(test_config()).await;
    let p = add_player(&server.store, "alice", None);
    let (_first, connected) = login(&server.addr, "alice", None).await;
    let session_id = connected["data"]["session_id"].as_str().unwrap().to_string();

    let (_second, second_connected) = login(&server.addr, "alice", Some(&session_id)).await;

    assert_eq!(second_connected["data"]["session_id"], session_id.as_str());
    assert_eq!(server.manager.connections_for_player(&p).await.len(), 2);
}

#[tokio::test]
async fn test_room_broadcast_reaches_websocket_clients() {
    let server = start_server(test_config()).await;
    let a = add_player(&server.store, "alice", Some("lobby"));
    add_player(&server.store, "bob", Some("lobby"));
    let (mut alice, _) = login(&server.addr, "alice", None).await;
    let (mut bob, _) = login(&server.addr, "bob", None).await;

    let event = GameEvent::new("say", json!({ "text": "hi bob" })).for_player(a);
    let result = server
        .manager
        .broadcast_to_room(&RoomId::new("lobby"), &event, Some(a))
        .await;

    assert_eq!(result.successful_deliveries, 1);
    let received = next_event(&mut bob).await;
    assert_eq!(received["event_type"], "say");
    assert_eq!(received["data"]["text"], "hi bob");

    send_frame(&mut alice, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut alice).await["event_type"], "pong");
}

#[tokio::test]
async fn test_run_until_shutdown_stops_manager() {
    let store = Arc::new(MemoryStore::new());
    let server = MudlinkServer::builder()
        .bind("127.0.0.1:0")
        .config(test_config())
        .store(Arc::clone(&store))
        .build(JwtDecoder::new(SECRET))
        .await
        .expect("server should build");
    let manager = server.manager();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.is_running());

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("server should stop")
        .expect("task should not panic");

    assert!(result.is_ok());
    assert!(!manager.is_running());
}
