//! The session tracker: which session is current for each player, and
//! which sockets were opened under it.
//!
//! # Concurrency note
//!
//! `SessionTracker` is NOT thread-safe by itself — it uses plain
//! `HashMap`s. The connection manager owns it behind a mutex and never
//! holds that mutex across a socket operation. Keeping the type itself
//! lock-free keeps it trivially testable.

use std::collections::HashMap;

use mudlink_protocol::{PlayerId, SessionId};
use mudlink_transport::ConnectionId;

use crate::SessionState;

/// A session id is only unique per player: clients pick their own ids,
/// so two players may well send the same string.
type SessionKey = (PlayerId, SessionId);

/// Tracks the current session of every player.
///
/// Three maps are kept in sync:
///
/// ```text
/// player_sessions:      PlayerId              → SessionId            (current only)
/// session_connections:  (PlayerId, SessionId) → [ConnectionId, ...]  (registration order)
/// connection_sessions:  ConnectionId          → (PlayerId, SessionId)
/// ```
///
/// A superseded session's entries are removed from all three maps the
/// moment [`begin`](Self::begin) installs its replacement.
#[derive(Debug, Default)]
pub struct SessionTracker {
    player_sessions: HashMap<PlayerId, SessionId>,
    session_connections: HashMap<SessionKey, Vec<ConnectionId>>,
    connection_sessions: HashMap<ConnectionId, SessionKey>,
}

impl SessionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `new_session` as the player's current session.
    ///
    /// The previous session (if any) is forgotten together with its
    /// connection list. The sockets that belonged to it must already be
    /// unreachable (removed from the connection registry) when this is
    /// called, so there is never a moment where two sessions look valid.
    /// Closing them is the caller's job.
    ///
    /// Returns the previous session id.
    pub fn begin(
        &mut self,
        player_id: PlayerId,
        new_session: SessionId,
    ) -> Option<SessionId> {
        let previous = self.player_sessions.insert(player_id, new_session.clone());

        if let Some(old) = &previous {
            self.forget_session(&(player_id, old.clone()));
        }
        // Re-beginning the same id still resets its connection list.
        let key = (player_id, new_session.clone());
        self.forget_session(&key);
        self.session_connections.insert(key, Vec::new());

        tracing::info!(
            %player_id,
            session_id = %new_session,
            previous = previous.as_ref().map(|s| s.as_str()).unwrap_or("none"),
            "game session started"
        );
        previous
    }

    /// Registers a socket under one of the player's sessions.
    ///
    /// Returns `false` if the player has no such session (never begun, or
    /// already superseded).
    pub fn attach(
        &mut self,
        player_id: PlayerId,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> bool {
        let key = (player_id, session_id.clone());
        let Some(list) = self.session_connections.get_mut(&key) else {
            return false;
        };
        if !list.contains(&connection_id) {
            list.push(connection_id.clone());
        }
        self.connection_sessions.insert(connection_id, key);
        true
    }

    /// Removes a socket from whichever session it was registered under.
    ///
    /// Unknown connection ids are a silent no-op. The session itself stays
    /// current even when its last socket leaves.
    pub fn detach(&mut self, connection_id: &ConnectionId) -> Option<SessionId> {
        let key = self.connection_sessions.remove(connection_id)?;
        if let Some(list) = self.session_connections.get_mut(&key) {
            list.retain(|c| c != connection_id);
        }
        Some(key.1)
    }

    /// Ends the player's session entirely.
    pub fn end(&mut self, player_id: &PlayerId) -> Option<SessionId> {
        let session_id = self.player_sessions.remove(player_id)?;
        self.forget_session(&(*player_id, session_id.clone()));
        tracing::debug!(%player_id, %session_id, "game session ended");
        Some(session_id)
    }

    /// Returns the player's current session id.
    pub fn current(&self, player_id: &PlayerId) -> Option<&SessionId> {
        self.player_sessions.get(player_id)
    }

    /// Returns the player's session state.
    pub fn state(&self, player_id: &PlayerId) -> SessionState {
        match self.player_sessions.get(player_id) {
            Some(id) => SessionState::Active(id.clone()),
            None => SessionState::NoSession,
        }
    }

    /// Returns `true` if `session_id` is the player's current session.
    pub fn is_current(&self, player_id: &PlayerId, session_id: &SessionId) -> bool {
        self.player_sessions.get(player_id) == Some(session_id)
    }

    /// Returns the sockets registered under one of the player's
    /// sessions, in registration order. Unknown sessions yield an empty
    /// slice.
    pub fn connections(&self, player_id: &PlayerId, session_id: &SessionId) -> &[ConnectionId] {
        self.session_connections
            .get(&(*player_id, session_id.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the session a socket was registered under.
    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<&SessionId> {
        self.connection_sessions.get(connection_id).map(|(_, s)| s)
    }

    /// Number of players with a current session.
    pub fn len(&self) -> usize {
        self.player_sessions.len()
    }

    /// Returns `true` if no player has a session.
    pub fn is_empty(&self) -> bool {
        self.player_sessions.is_empty()
    }

    fn forget_session(&mut self, key: &SessionKey) {
        if let Some(conns) = self.session_connections.remove(key) {
            for conn in conns {
                self.connection_sessions.remove(&conn);
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionTracker`.
    //!
    //! Naming convention: `test_{function}_{scenario}_{expected}`.

    use super::*;

    fn pid() -> PlayerId {
        PlayerId::new_v4()
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    fn cid(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    // =====================================================================
    // begin()
    // =====================================================================

    #[test]
    fn test_begin_first_session_returns_no_previous() {
        let mut tracker = SessionTracker::new();
        let p = pid();

        let previous = tracker.begin(p, sid("s1"));

        assert_eq!(previous, None);
        assert_eq!(tracker.state(&p), SessionState::Active(sid("s1")));
        assert!(tracker.connections(&p, &sid("s1")).is_empty());
    }

    #[test]
    fn test_begin_replaces_previous_and_forgets_its_connections() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));
        tracker.attach(p, &sid("s1"), cid("c1"));

        let previous = tracker.begin(p, sid("s2"));

        assert_eq!(previous, Some(sid("s1")));
        assert!(tracker.connections(&p, &sid("s1")).is_empty());
        assert_eq!(tracker.session_of(&cid("c1")), None);
        assert!(tracker.is_current(&p, &sid("s2")));
    }

    #[test]
    fn test_begin_same_id_resets_connection_list() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));
        tracker.attach(p, &sid("s1"), cid("c1"));

        tracker.begin(p, sid("s1"));

        assert!(tracker.connections(&p, &sid("s1")).is_empty());
    }

    #[test]
    fn test_begin_does_not_touch_other_players() {
        let mut tracker = SessionTracker::new();
        let (a, b) = (pid(), pid());
        tracker.begin(a, sid("a1"));
        tracker.begin(b, sid("b1"));
        tracker.attach(b, &sid("b1"), cid("cb"));

        tracker.begin(a, sid("a2"));

        assert_eq!(tracker.connections(&b, &sid("b1")), &[cid("cb")]);
    }

    #[test]
    fn test_begin_shared_id_string_keeps_players_apart() {
        let mut tracker = SessionTracker::new();
        let (alice, bob) = (pid(), pid());
        tracker.begin(alice, sid("tab"));
        tracker.attach(alice, &sid("tab"), cid("a1"));

        tracker.begin(bob, sid("tab"));
        tracker.attach(bob, &sid("tab"), cid("b1"));
        tracker.begin(bob, sid("bob-new"));

        assert_eq!(tracker.connections(&alice, &sid("tab")), &[cid("a1")]);
        assert_eq!(tracker.session_of(&cid("a1")), Some(&sid("tab")));
        assert_eq!(tracker.session_of(&cid("b1")), None);
        assert!(tracker.attach(alice, &sid("tab"), cid("a2")));
    }

    // =====================================================================
    // attach() / detach()
    // =====================================================================

    #[test]
    fn test_attach_keeps_registration_order_and_ignores_duplicates() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));

        assert!(tracker.attach(p, &sid("s1"), cid("c1")));
        assert!(tracker.attach(p, &sid("s1"), cid("c2")));
        assert!(tracker.attach(p, &sid("s1"), cid("c1")));

        assert_eq!(tracker.connections(&p, &sid("s1")), &[cid("c1"), cid("c2")]);
    }

    #[test]
    fn test_attach_unknown_session_returns_false() {
        let mut tracker = SessionTracker::new();
        assert!(!tracker.attach(pid(), &sid("ghost"), cid("c1")));
        assert_eq!(tracker.session_of(&cid("c1")), None);
    }

    #[test]
    fn test_attach_other_players_session_returns_false() {
        let mut tracker = SessionTracker::new();
        let (owner, intruder) = (pid(), pid());
        tracker.begin(owner, sid("s1"));

        assert!(!tracker.attach(intruder, &sid("s1"), cid("c1")));
        assert!(tracker.connections(&owner, &sid("s1")).is_empty());
    }

    #[test]
    fn test_detach_removes_connection_but_keeps_session() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));
        tracker.attach(p, &sid("s1"), cid("c1"));

        assert_eq!(tracker.detach(&cid("c1")), Some(sid("s1")));

        assert!(tracker.connections(&p, &sid("s1")).is_empty());
        assert!(tracker.is_current(&p, &sid("s1")));
    }

    #[test]
    fn test_detach_unknown_connection_is_noop() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.detach(&cid("nope")), None);
        assert_eq!(tracker.detach(&cid("nope")), None);
    }

    // =====================================================================
    // end() / len()
    // =====================================================================

    #[test]
    fn test_end_removes_session_and_connections() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));
        tracker.attach(p, &sid("s1"), cid("c1"));

        assert_eq!(tracker.end(&p), Some(sid("s1")));

        assert_eq!(tracker.state(&p), SessionState::NoSession);
        assert_eq!(tracker.session_of(&cid("c1")), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_end_unknown_player_returns_none() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.end(&pid()), None);
    }

    #[test]
    fn test_len_counts_players_not_sessions_seen() {
        let mut tracker = SessionTracker::new();
        let p = pid();
        tracker.begin(p, sid("s1"));
        tracker.begin(p, sid("s2"));
        tracker.begin(pid(), sid("t1"));

        assert_eq!(tracker.len(), 2);
    }
}
