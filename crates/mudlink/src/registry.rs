//! The connection registry: every live socket and who owns it.
//!
//! ```text
//! active:             ConnectionId → Arc<C>              (the socket handles)
//! player_connections: PlayerId     → [ConnectionId, ...] (registration order)
//! metadata:           ConnectionId → ConnectionMetadata
//! online:             PlayerId     → OnlineRecord
//! ```
//!
//! A player key exists in `player_connections` only while its list is
//! non-empty, and has an `online` record exactly as long. Every method
//! that shrinks a list enforces this before it returns.
//!
//! The registry is plain synchronous state. The manager wraps it in a
//! `tokio::sync::Mutex` and never holds that lock across a send or close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use mudlink_protocol::{PlayerId, RoomId, SessionId};
use mudlink_transport::{Connection, ConnectionId};

/// Bookkeeping for one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Owner of the socket.
    pub player_id: PlayerId,
    /// Session the socket was registered under.
    pub session_id: Option<SessionId>,
    /// When the socket was registered.
    pub created_at: Instant,
    /// Last time the player was seen on any socket.
    pub last_seen: Instant,
}

/// A player's aggregate online presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineRecord {
    pub player_id: PlayerId,
    pub display_name: String,
    pub current_room: Option<RoomId>,
    pub session_id: Option<SessionId>,
    pub connected_at: Instant,
    pub last_seen: Instant,
}

/// What [`Registry::remove`] took out.
pub(crate) struct Removed<C> {
    /// The socket handle, if it was still in the active map.
    pub handle: Option<Arc<C>>,
    /// `true` if this was the player's last socket.
    pub player_went_offline: bool,
}

/// Counts returned by [`Registry::remove_orphans`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrphanCounts {
    pub metadata: usize,
    pub index_entries: usize,
}

pub(crate) struct Registry<C> {
    active: HashMap<ConnectionId, Arc<C>>,
    player_connections: HashMap<PlayerId, Vec<ConnectionId>>,
    metadata: HashMap<ConnectionId, ConnectionMetadata>,
    online: HashMap<PlayerId, OnlineRecord>,
}

impl<C: Connection> Registry<C> {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            player_connections: HashMap::new(),
            metadata: HashMap::new(),
            online: HashMap::new(),
        }
    }

    /// Adds a socket to the active map, the player index, and metadata.
    ///
    /// Registering the same id twice replaces the handle but does not
    /// duplicate the index entry.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        player_id: PlayerId,
        session_id: Option<SessionId>,
        handle: Arc<C>,
    ) {
        let now = Instant::now();
        self.active.insert(connection_id.clone(), handle);
        let list = self.player_connections.entry(player_id).or_default();
        if !list.contains(&connection_id) {
            list.push(connection_id.clone());
        }
        self.metadata.insert(
            connection_id,
            ConnectionMetadata {
                player_id,
                session_id,
                created_at: now,
                last_seen: now,
            },
        );
    }

    /// Creates or refreshes the player's online record.
    pub fn upsert_online(
        &mut self,
        player_id: PlayerId,
        display_name: String,
        current_room: Option<RoomId>,
        session_id: Option<SessionId>,
    ) {
        let now = Instant::now();
        let record = self.online.entry(player_id).or_insert_with(|| OnlineRecord {
            player_id,
            display_name: display_name.clone(),
            current_room: None,
            session_id: None,
            connected_at: now,
            last_seen: now,
        });
        record.display_name = display_name;
        if current_room.is_some() {
            record.current_room = current_room;
        }
        record.session_id = session_id;
        record.last_seen = record.last_seen.max(now);
    }

    /// Removes a socket from every map.
    ///
    /// Silent no-op for unknown ids. When the player's list becomes
    /// empty, the list and the online record are dropped with it.
    pub fn remove(&mut self, player_id: &PlayerId, connection_id: &ConnectionId) -> Removed<C> {
        let handle = self.active.remove(connection_id);
        let owner = self
            .metadata
            .remove(connection_id)
            .map(|meta| meta.player_id);

        let mut player_went_offline = self.remove_from_index(player_id, connection_id);
        if let Some(owner) = owner.filter(|o| o != player_id) {
            player_went_offline |= self.remove_from_index(&owner, connection_id);
        }

        Removed {
            handle,
            player_went_offline,
        }
    }

    /// Removes every socket of a player and their online record.
    ///
    /// Returns the removed ids with their handles, in registration order.
    pub fn remove_player(&mut self, player_id: &PlayerId) -> Vec<(ConnectionId, Option<Arc<C>>)> {
        let ids = self.player_connections.remove(player_id).unwrap_or_default();
        self.online.remove(player_id);
        ids.into_iter()
            .map(|id| {
                self.metadata.remove(&id);
                let handle = self.active.remove(&id);
                (id, handle)
            })
            .collect()
    }

    /// Copies a player's sockets with their handles, in registration
    /// order. The copy is what delivery iterates over after the lock is
    /// released.
    pub fn handles_for(&self, player_id: &PlayerId) -> Vec<(ConnectionId, Option<Arc<C>>)> {
        self.player_connections
            .get(player_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| (id.clone(), self.active.get(id).cloned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connections_for(&self, player_id: &PlayerId) -> Vec<ConnectionId> {
        self.player_connections
            .get(player_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn handle(&self, connection_id: &ConnectionId) -> Option<Arc<C>> {
        self.active.get(connection_id).cloned()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.active.contains_key(connection_id)
    }

    pub fn owner_of(&self, connection_id: &ConnectionId) -> Option<PlayerId> {
        self.metadata.get(connection_id).map(|m| m.player_id)
    }

    pub fn metadata(&self, connection_id: &ConnectionId) -> Option<&ConnectionMetadata> {
        self.metadata.get(connection_id)
    }

    pub fn all_metadata(&self) -> impl Iterator<Item = (&ConnectionId, &ConnectionMetadata)> {
        self.metadata.iter()
    }

    /// Every active socket with its owner.
    pub fn all_handles(&self) -> Vec<(ConnectionId, PlayerId, Arc<C>)> {
        self.active
            .iter()
            .filter_map(|(id, handle)| {
                let owner = self.metadata.get(id)?.player_id;
                Some((id.clone(), owner, Arc::clone(handle)))
            })
            .collect()
    }

    pub fn is_online(&self, player_id: &PlayerId) -> bool {
        self.player_connections.contains_key(player_id)
    }

    pub fn online(&self, player_id: &PlayerId) -> Option<&OnlineRecord> {
        self.online.get(player_id)
    }

    pub fn online_players(&self) -> Vec<OnlineRecord> {
        self.online.values().cloned().collect()
    }

    pub fn online_player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.player_connections.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn set_room(&mut self, player_id: &PlayerId, room_id: Option<RoomId>) {
        if let Some(record) = self.online.get_mut(player_id) {
            record.current_room = room_id;
        }
    }

    /// Moves the player's last-seen (and every socket's) forward to `now`.
    ///
    /// Timestamps never move backwards, so two sockets racing to mark the
    /// same player leave the later instant in place.
    pub fn touch(&mut self, player_id: &PlayerId, now: Instant) -> bool {
        let Some(record) = self.online.get_mut(player_id) else {
            return false;
        };
        record.last_seen = record.last_seen.max(now);
        if let Some(ids) = self.player_connections.get(player_id) {
            for id in ids {
                if let Some(meta) = self.metadata.get_mut(id) {
                    meta.last_seen = meta.last_seen.max(now);
                }
            }
        }
        true
    }

    /// Players whose last-seen is older than `cutoff`.
    pub fn stale_players(&self, cutoff: Instant) -> Vec<PlayerId> {
        self.online
            .values()
            .filter(|r| r.last_seen < cutoff)
            .map(|r| r.player_id)
            .collect()
    }

    /// Drops metadata with no active handle and index entries pointing at
    /// sockets that are no longer active. Online records of players left
    /// with no sockets go too.
    pub fn remove_orphans(&mut self) -> OrphanCounts {
        let mut counts = OrphanCounts::default();

        let active = &self.active;
        self.metadata.retain(|id, _| {
            let keep = active.contains_key(id);
            if !keep {
                counts.metadata += 1;
            }
            keep
        });

        self.player_connections.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| active.contains_key(id));
            counts.index_entries += before - ids.len();
            !ids.is_empty()
        });

        let index = &self.player_connections;
        self.online.retain(|player_id, _| index.contains_key(player_id));
        counts
    }

    pub fn connection_count(&self) -> usize {
        self.active.len()
    }

    pub fn player_count(&self) -> usize {
        self.player_connections.len()
    }

    /// Returns `true` if the player's list is now empty (and was dropped).
    fn remove_from_index(&mut self, player_id: &PlayerId, connection_id: &ConnectionId) -> bool {
        let Some(ids) = self.player_connections.get_mut(player_id) else {
            return false;
        };
        ids.retain(|id| id != connection_id);
        if ids.is_empty() {
            self.player_connections.remove(player_id);
            self.online.remove(player_id);
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn has_player_key(&self, player_id: &PlayerId) -> bool {
        self.player_connections.contains_key(player_id)
    }

    #[cfg(test)]
    pub(crate) fn insert_orphan_metadata(&mut self, connection_id: ConnectionId, player_id: PlayerId) {
        let now = Instant::now();
        self.metadata.insert(
            connection_id.clone(),
            ConnectionMetadata {
                player_id,
                session_id: None,
                created_at: now,
                last_seen: now,
            },
        );
        self.player_connections
            .entry(player_id)
            .or_default()
            .push(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudlink_transport::{SocketState, TransportError};
    use std::time::Duration;

    struct NullConn(ConnectionId);

    impl Connection for NullConn {
        type Error = TransportError;

        async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.0.clone()
        }

        fn state(&self) -> SocketState {
            SocketState::Connected
        }
    }

    fn conn(id: &str) -> (ConnectionId, Arc<NullConn>) {
        let id = ConnectionId::new(id);
        (id.clone(), Arc::new(NullConn(id)))
    }

    fn registry_with(player: PlayerId, ids: &[&str]) -> Registry<NullConn> {
        let mut registry = Registry::new();
        for id in ids {
            let (cid, handle) = conn(id);
            registry.register(cid, player, None, handle);
        }
        registry.upsert_online(player, "Armitage".into(), None, None);
        registry
    }

    #[test]
    fn test_register_keeps_registration_order() {
        let p = PlayerId::new_v4();
        let registry = registry_with(p, &["c1", "c2", "c3"]);

        let ids: Vec<String> = registry
            .connections_for(&p)
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(registry.connection_count(), 3);
    }

    #[test]
    fn test_register_twice_does_not_duplicate_index() {
        let p = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1"]);
        let (cid, handle) = conn("c1");
        registry.register(cid, p, None, handle);

        assert_eq!(registry.connections_for(&p).len(), 1);
    }

    #[test]
    fn test_remove_last_connection_drops_player_key() {
        let p = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1", "c2"]);

        let first = registry.remove(&p, &ConnectionId::new("c1"));
        assert!(first.handle.is_some());
        assert!(!first.player_went_offline);
        assert!(registry.is_online(&p));

        let second = registry.remove(&p, &ConnectionId::new("c2"));
        assert!(second.player_went_offline);
        assert!(!registry.has_player_key(&p));
        assert!(registry.online(&p).is_none());
    }

    #[test]
    fn test_remove_unknown_connection_is_noop() {
        let p = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1"]);

        let removed = registry.remove(&p, &ConnectionId::new("nope"));

        assert!(removed.handle.is_none());
        assert!(!removed.player_went_offline);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_remove_player_takes_all_handles() {
        let p = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1", "c2"]);

        let taken = registry.remove_player(&p);

        assert_eq!(taken.len(), 2);
        assert!(taken.iter().all(|(_, h)| h.is_some()));
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.has_player_key(&p));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let p = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1"]);
        let later = Instant::now() + Duration::from_secs(10);
        let earlier = Instant::now();

        registry.touch(&p, later);
        registry.touch(&p, earlier);

        assert_eq!(registry.online(&p).map(|r| r.last_seen), Some(later));
        assert_eq!(
            registry.metadata(&ConnectionId::new("c1")).map(|m| m.last_seen),
            Some(later)
        );
    }

    #[test]
    fn test_touch_offline_player_returns_false() {
        let mut registry: Registry<NullConn> = Registry::new();
        assert!(!registry.touch(&PlayerId::new_v4(), Instant::now()));
    }

    #[test]
    fn test_remove_orphans_drops_dangling_entries() {
        let p = PlayerId::new_v4();
        let ghost = PlayerId::new_v4();
        let mut registry = registry_with(p, &["c1"]);
        registry.insert_orphan_metadata(ConnectionId::new("ghost-conn"), ghost);

        let counts = registry.remove_orphans();

        assert_eq!(counts.metadata, 1);
        assert_eq!(counts.index_entries, 1);
        assert!(!registry.has_player_key(&ghost));
        assert!(registry.is_online(&p));
    }

    #[test]
    fn test_stale_players_uses_last_seen() {
        let p = PlayerId::new_v4();
        let before_connect = Instant::now();
        let registry = registry_with(p, &["c1"]);

        assert!(registry.stale_players(before_connect).is_empty());
        assert_eq!(
            registry.stale_players(Instant::now() + Duration::from_secs(60)),
            vec![p]
        );
    }
}
