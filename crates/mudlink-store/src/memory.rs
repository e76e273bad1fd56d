//! An in-process [`PlayerStore`] backed by hash maps.
//!
//! Used by the demo server and by tests. Everything lives behind one
//! `std::sync::Mutex`; no lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use mudlink_protocol::{PlayerId, RoomId};

use crate::{PlayerRecord, PlayerStore, RoomRecord, StoreError};

#[derive(Default)]
struct Tables {
    players: HashMap<PlayerId, PlayerRecord>,
    rooms: HashMap<RoomId, RoomRecord>,
}

/// A [`PlayerStore`] that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a player.
    pub fn insert_player(&self, record: PlayerRecord) {
        if let Ok(mut tables) = self.lock() {
            tables.players.insert(record.player_id, record);
        }
    }

    /// Inserts or replaces a room.
    pub fn insert_room(&self, record: RoomRecord) {
        if let Ok(mut tables) = self.lock() {
            tables.rooms.insert(record.id.clone(), record);
        }
    }

    /// Returns the last persisted activity for a player.
    pub fn last_active(&self, player_id: PlayerId) -> Option<u64> {
        self.lock()
            .ok()?
            .players
            .get(&player_id)
            .and_then(|p| p.last_active_ms)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}

impl PlayerStore for MemoryStore {
    async fn get_player_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<PlayerRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .players
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn get_player(
        &self,
        player_id: PlayerId,
    ) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.lock()?.players.get(&player_id).cloned())
    }

    async fn update_player_last_active(
        &self,
        player_id: PlayerId,
        at_ms: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let player = tables.players.get_mut(&player_id).ok_or_else(|| {
            StoreError::Query(format!("player {player_id} not found"))
        })?;
        // Never move the persisted timestamp backwards.
        player.last_active_ms = Some(player.last_active_ms.map_or(at_ms, |old| old.max(at_ms)));
        tracing::trace!(%player_id, at_ms, "last active persisted");
        Ok(())
    }

    async fn get_room_by_id(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomRecord>, StoreError> {
        Ok(self.lock()?.rooms.get(room_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(user_id: &str) -> PlayerRecord {
        PlayerRecord {
            player_id: PlayerId::new_v4(),
            user_id: user_id.into(),
            name: format!("{user_id}-char"),
            current_room_id: Some(RoomId::new("earth_001")),
            last_active_ms: None,
        }
    }

    #[tokio::test]
    async fn test_get_player_by_user_id_finds_owner() {
        let store = MemoryStore::new();
        let alice = player("alice");
        store.insert_player(alice.clone());
        store.insert_player(player("bob"));

        let found = store.get_player_by_user_id("alice").await.unwrap();
        assert_eq!(found, Some(alice));
    }

    #[tokio::test]
    async fn test_get_player_by_user_id_unknown_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get_player_by_user_id("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_last_active_never_moves_backwards() {
        let store = MemoryStore::new();
        let p = player("alice");
        let id = p.player_id;
        store.insert_player(p);

        store.update_player_last_active(id, 2_000).await.unwrap();
        store.update_player_last_active(id, 1_000).await.unwrap();

        assert_eq!(store.last_active(id), Some(2_000));
    }

    #[tokio::test]
    async fn test_update_last_active_unknown_player_is_query_error() {
        let store = MemoryStore::new();
        let result = store.update_player_last_active(PlayerId::new_v4(), 1).await;
        assert!(matches!(result, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_get_room_by_id_round_trip() {
        let store = MemoryStore::new();
        let room = RoomRecord {
            id: RoomId::new("earth_001"),
            name: "Derby Street".into(),
        };
        store.insert_room(room.clone());

        assert_eq!(store.get_room_by_id(&room.id).await.unwrap(), Some(room));
        assert!(store
            .get_room_by_id(&RoomId::new("missing"))
            .await
            .unwrap()
            .is_none());
    }
}
