//! Shared test fixtures: a scriptable socket and manager constructors.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mudlink::prelude::*;
use mudlink_session::Claims;
use mudlink_transport::TransportError;
use serde_json::Value;

/// A socket that records what it was sent.
///
/// Sends can be told to fail, the reported state can be changed, and
/// close can be scripted to fail or hang.
pub struct MockConnection {
    id: ConnectionId,
    sent: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    state: Mutex<SocketState>,
    closes: AtomicUsize,
    close_error: Mutex<Option<String>>,
    close_hangs: AtomicBool,
}

impl MockConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(id),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            state: Mutex::new(SocketState::Connected),
            closes: AtomicUsize::new(0),
            close_error: Mutex::new(None),
            close_hangs: AtomicBool::new(false),
        })
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: SocketState) {
        *self.state.lock().unwrap() = state;
    }

    /// Makes `close()` fail with a `CloseFailed` error carrying `message`.
    pub fn fail_close_with(&self, message: &str) {
        *self.close_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn hang_on_close(&self) {
        self.close_hangs.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every frame sent so far, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// `event_type` of every frame sent so far.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["event_type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Frames of one event type.
    pub fn sent_of(&self, event_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["event_type"] == event_type)
            .collect()
    }
}

impl Connection for MockConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock send failure",
            )));
        }
        let text = String::from_utf8_lossy(data).into_owned();
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_hangs.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let error = self.close_error.lock().unwrap().clone();
        self.set_state(SocketState::Closed);
        match error {
            Some(message) => Err(TransportError::CloseFailed(std::io::Error::other(message))),
            None => Ok(()),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id.clone()
    }

    fn state(&self) -> SocketState {
        *self.state.lock().unwrap()
    }
}

/// Treats the token as the subject. `"bad"` fails to decode.
pub struct SubjectDecoder;

impl TokenDecoder for SubjectDecoder {
    fn decode(&self, token: &str) -> Option<Claims> {
        if token == "bad" {
            return None;
        }
        Some(Claims {
            sub: Some(token.to_string()),
            exp: u64::MAX,
            iat: None,
        })
    }
}

pub type TestManager = ConnectionManager<MockConnection, MemoryStore>;

/// A config whose audit log lands in a per-test temp directory.
pub fn test_config(name: &str) -> ManagerConfig {
    ManagerConfig {
        audit_dir: std::env::temp_dir().join(format!("mudlink-tests-{}-{name}", std::process::id())),
        environment: "test".into(),
        close_timeout: Duration::from_millis(100),
        ..ManagerConfig::default()
    }
}

/// A manager over an empty memory store.
pub fn manager(name: &str) -> (Arc<TestManager>, Arc<MemoryStore>) {
    manager_with_config(test_config(name))
}

pub fn manager_with_config(config: ManagerConfig) -> (Arc<TestManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = ConnectionManager::new(config, Arc::new(SubjectDecoder), Some(Arc::clone(&store)));
    (Arc::new(manager), store)
}

/// Adds a player to the store and returns its id.
pub fn add_player(store: &MemoryStore, user_id: &str, name: &str, room: Option<&str>) -> PlayerId {
    let player_id = PlayerId::new_v4();
    store.insert_player(PlayerRecord {
        player_id,
        user_id: user_id.to_string(),
        name: name.to_string(),
        current_room_id: room.map(RoomId::new),
        last_active_ms: None,
    });
    player_id
}

/// Connects a fresh mock socket under the given session.
pub async fn connect(
    manager: &TestManager,
    player_id: PlayerId,
    connection_id: &str,
    session: &str,
) -> Arc<MockConnection> {
    let conn = MockConnection::new(connection_id);
    let outcome = manager
        .connect_websocket(Arc::clone(&conn), player_id, Some(SessionId::new(session)))
        .await;
    assert!(outcome.registered);
    conn
}

/// Reads every audit record written under `config`.
pub async fn read_audit(config: &ManagerConfig) -> Vec<Value> {
    let contents = tokio::fs::read_to_string(config.login_audit_path())
        .await
        .unwrap_or_default();
    contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
