//! Room id canonicalization.
//!
//! Clients and older events may carry a stale or display-form room id.
//! Before a room id is used as a presence key it is resolved through two
//! sources, in order:
//!
//! 1. the room-manager-scoped [`RoomDirectory`] (in memory, fast), then
//! 2. the general persistence lookup ([`StoreRoomLookup`]).
//!
//! Resolution is best-effort. If neither source knows the id, or either
//! fails, the raw id is used unchanged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use mudlink_protocol::RoomId;
use mudlink_store::PlayerStore;

use crate::RoomError;

/// Anything that can map a raw room id to a canonical one.
pub trait RoomLookup: Send + Sync + 'static {
    /// Returns the canonical id for `raw_id`, or `Ok(None)` if unknown.
    fn find_room(
        &self,
        raw_id: &str,
    ) -> impl Future<Output = Result<Option<RoomId>, RoomError>> + Send;
}

/// Resolves `raw_id` to a canonical room id.
///
/// Tries `scoped` first, then `general`. Lookup errors are logged at
/// debug and treated as misses. Never fails: the fallback is `raw_id`
/// itself.
pub async fn canonical_room_id<A, B>(
    scoped: Option<&A>,
    general: Option<&B>,
    raw_id: &str,
) -> RoomId
where
    A: RoomLookup,
    B: RoomLookup,
{
    if let Some(lookup) = scoped {
        match lookup.find_room(raw_id).await {
            Ok(Some(room_id)) => return room_id,
            Ok(None) => {}
            Err(e) => tracing::debug!(raw_id, error = %e, "scoped room lookup failed"),
        }
    }
    if let Some(lookup) = general {
        match lookup.find_room(raw_id).await {
            Ok(Some(room_id)) => return room_id,
            Ok(None) => {}
            Err(e) => tracing::debug!(raw_id, error = %e, "store room lookup failed"),
        }
    }
    RoomId::new(raw_id)
}

// ---------------------------------------------------------------------------
// RoomDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DirectoryTables {
    rooms: HashMap<String, RoomId>,
    aliases: HashMap<String, RoomId>,
}

/// In-memory room directory kept by the room manager.
///
/// Holds every room the game world has loaded, plus aliases for ids that
/// were renamed or have a display form.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    tables: RwLock<DirectoryTables>,
}

impl RoomDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loaded room under its canonical id.
    pub fn register(&self, room_id: RoomId) {
        if let Ok(mut tables) = self.tables.write() {
            tables.rooms.insert(room_id.as_str().to_string(), room_id);
        }
    }

    /// Maps an alternate id onto a canonical room id.
    pub fn alias(&self, alias: impl Into<String>, canonical: RoomId) {
        if let Ok(mut tables) = self.tables.write() {
            tables.aliases.insert(alias.into(), canonical);
        }
    }

    /// Number of registered rooms.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.rooms.len()).unwrap_or(0)
    }

    /// Returns `true` if no rooms are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RoomLookup for RoomDirectory {
    async fn find_room(&self, raw_id: &str) -> Result<Option<RoomId>, RoomError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| RoomError::Lookup("room directory poisoned".into()))?;
        Ok(tables
            .rooms
            .get(raw_id)
            .or_else(|| tables.aliases.get(raw_id))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// StoreRoomLookup
// ---------------------------------------------------------------------------

/// Adapts a [`PlayerStore`] into a [`RoomLookup`].
pub struct StoreRoomLookup<S: PlayerStore> {
    store: Arc<S>,
}

impl<S: PlayerStore> StoreRoomLookup<S> {
    /// Wraps a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: PlayerStore> RoomLookup for StoreRoomLookup<S> {
    async fn find_room(&self, raw_id: &str) -> Result<Option<RoomId>, RoomError> {
        let room = self.store.get_room_by_id(&RoomId::new(raw_id)).await?;
        Ok(room.map(|r| r.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudlink_store::{MemoryStore, RoomRecord};

    /// A lookup that always errors.
    struct FailingLookup;

    impl RoomLookup for FailingLookup {
        async fn find_room(&self, _raw_id: &str) -> Result<Option<RoomId>, RoomError> {
            Err(RoomError::Lookup("boom".into()))
        }
    }

    fn store_with_room(id: &str) -> StoreRoomLookup<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_room(RoomRecord {
            id: RoomId::new(id),
            name: "Derby Street".into(),
        });
        StoreRoomLookup::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_canonical_room_id_prefers_scoped_alias() {
        let directory = RoomDirectory::new();
        directory.alias("derby_st", RoomId::new("earth_derby_001"));

        let resolved = canonical_room_id(
            Some(&directory),
            Some(&store_with_room("derby_st")),
            "derby_st",
        )
        .await;

        assert_eq!(resolved, RoomId::new("earth_derby_001"));
    }

    #[tokio::test]
    async fn test_canonical_room_id_falls_back_to_store() {
        let directory = RoomDirectory::new();

        let resolved = canonical_room_id(
            Some(&directory),
            Some(&store_with_room("earth_derby_001")),
            "earth_derby_001",
        )
        .await;

        assert_eq!(resolved, RoomId::new("earth_derby_001"));
    }

    #[tokio::test]
    async fn test_canonical_room_id_both_miss_returns_raw() {
        let resolved = canonical_room_id(
            Some(&RoomDirectory::new()),
            Some(&store_with_room("other")),
            "stale_room",
        )
        .await;

        assert_eq!(resolved, RoomId::new("stale_room"));
    }

    #[tokio::test]
    async fn test_canonical_room_id_both_fail_returns_raw() {
        let resolved =
            canonical_room_id(Some(&FailingLookup), Some(&FailingLookup), "stale_room").await;

        assert_eq!(resolved, RoomId::new("stale_room"));
    }

    #[tokio::test]
    async fn test_canonical_room_id_without_lookups_returns_raw() {
        let resolved =
            canonical_room_id::<RoomDirectory, RoomDirectory>(None, None, "raw").await;
        assert_eq!(resolved, RoomId::new("raw"));
    }

    #[tokio::test]
    async fn test_directory_register_resolves_canonical_id() {
        let directory = RoomDirectory::new();
        directory.register(RoomId::new("earth_001"));

        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.find_room("earth_001").await.unwrap(),
            Some(RoomId::new("earth_001"))
        );
        assert_eq!(directory.find_room("earth_002").await.unwrap(), None);
    }
}
