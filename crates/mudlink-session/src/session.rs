//! Session types: what a player's current "instance of play" looks like.
//!
//! A session is NOT a socket. One session may own several sockets (one per
//! browser tab). What a session guarantees is exclusivity: when a player
//! starts session N, no socket from session N-1 may stay reachable.

use mudlink_protocol::{PlayerId, SessionId};
use serde::Serialize;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Per-player session state.
///
/// ```text
///   NoSession ──(begin S1)──→ Active(S1) ──(begin S2)──→ Active(S2)
///       ↑                         │
///       └─────────(end)───────────┘
/// ```
///
/// There is no "suspended" state: a player whose sockets all dropped keeps
/// `Active` until the tracker is told to `end` the session or a newer
/// session replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The player has never started a session (or it was ended).
    NoSession,
    /// The player's current session.
    Active(SessionId),
}

impl SessionState {
    /// Returns the active session id, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::NoSession => None,
            Self::Active(id) => Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionResult
// ---------------------------------------------------------------------------

/// Outcome of replacing a player's session.
///
/// Session replacement never returns an error. Anything that went wrong
/// is listed in `errors` and `success` is set to `false`, so callers must
/// check `success` rather than rely on `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    /// Whose session was replaced.
    pub player_id: PlayerId,
    /// The session that is now current.
    pub new_session_id: SessionId,
    /// The session that was replaced, if there was one.
    pub previous_session_id: Option<SessionId>,
    /// How many sockets were closed and removed.
    pub connections_disconnected: usize,
    /// How many sockets the player had before the replacement.
    pub websocket_connections: usize,
    /// `false` if any step failed.
    pub success: bool,
    /// Human-readable descriptions of failed steps.
    pub errors: Vec<String>,
}

impl SessionResult {
    /// Starts a result for a replacement that has not run yet.
    pub fn pending(player_id: PlayerId, new_session_id: SessionId) -> Self {
        Self {
            player_id,
            new_session_id,
            previous_session_id: None,
            connections_disconnected: 0,
            websocket_connections: 0,
            success: true,
            errors: Vec::new(),
        }
    }

    /// Records a failed step and marks the result unsuccessful.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.success = false;
        self.errors.push(error.into());
    }
}
