//! Core protocol types for mudlink.
//!
//! Everything in this module either identifies something (a player, a
//! room, a session) or travels "on the wire" as JSON between the server
//! and a game client.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player character.
///
/// Players are stored under UUID primary keys, so the id wraps a [`Uuid`].
/// `#[serde(transparent)]` makes it serialize as the bare hyphenated UUID
/// string, which is the shape game clients expect for every identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Generates a fresh random player id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A room identifier.
///
/// Room ids are hierarchical strings such as
/// `earth_arkhamcity_northside_room_derby_st_001`. Clients sometimes hold
/// stale or display-form ids, which is why room lookups go through
/// canonicalization before they are trusted.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Wraps a raw room id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical "instance of play" for one player.
///
/// A session can span several sockets (browser tabs). Starting a new
/// session for a player invalidates every socket of the previous one.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wraps a session id supplied by a client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 32-character hex session id (128 bits).
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// GameEvent — server → client
// ---------------------------------------------------------------------------

/// Process-wide event counter. Clients use it to spot gaps.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Milliseconds since the UNIX epoch, saturating to 0 if the clock is
/// set before 1970.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An event pushed from the server to one or more players.
///
/// Movement, chat, combat, and system notices all share this shape; the
/// `event_type` string tells the client how to read `data`.
///
/// ```json
/// {
///   "event_type": "player_entered",
///   "timestamp": 1739812345123,
///   "sequence_number": 17,
///   "player_id": "6f1c...",
///   "room_id": "earth_arkham_001",
///   "data": { "name": "Armitage" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// What happened, e.g. `"chat_message"` or `"player_left"`.
    pub event_type: String,

    /// Milliseconds since the UNIX epoch when the event was built.
    pub timestamp: u64,

    /// Monotonic per-process counter.
    pub sequence_number: u64,

    /// The player the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,

    /// The room the event happened in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,

    /// Event-specific body.
    #[serde(default)]
    pub data: Value,
}

impl GameEvent {
    /// Builds an event stamped with the current time and the next
    /// sequence number.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: unix_millis(),
            sequence_number: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            player_id: None,
            room_id: None,
            data,
        }
    }

    /// Sets the player the event is about.
    pub fn for_player(mut self, player_id: PlayerId) -> Self {
        self.player_id = Some(player_id);
        self
    }

    /// Sets the room the event happened in.
    pub fn in_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Builds a standardized error event.
    ///
    /// `error_type` is a machine-readable code (`"payload_too_large"`,
    /// `"auth_failed"`, `"rate_limited"`); `message` is for humans.
    pub fn error(error_type: &str, message: impl Into<String>) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "error_type": error_type,
                "message": message.into(),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// ClientFrame — client → server
// ---------------------------------------------------------------------------

/// Frames a client may send over its socket.
///
/// Internally tagged, so a ping is `{"type":"ping"}` and a command is
/// `{"type":"command","command":"say","args":["hello"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on a socket.
    ///
    /// `session_id` is absent on a fresh login. Passing the current
    /// session id attaches the socket to the running session (another
    /// tab); any other value starts a new session.
    Handshake {
        token: String,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Keep-alive. Answered with a `pong` event.
    Ping,

    /// A game command for the game layer.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// The client is leaving on purpose.
    Disconnect {
        #[serde(default)]
        reason: String,
    },
}

// =========================================================================
// Tests
// =========================================================================
