//! The persistence seam.
//!
//! The connection core does not own a database. It calls into whatever
//! implements [`PlayerStore`], the same way the server accepts any
//! token decoder: a trait defines WHAT the core needs, and the game
//! server decides HOW (Postgres, SQLite, an in-memory map for tests).

use std::future::Future;

use mudlink_protocol::{PlayerId, RoomId};

use crate::{PlayerRecord, RoomRecord, StoreError};

/// Player and room lookups used by the connection core.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one store is shared by every
/// connection task and by the background last-active writer.
pub trait PlayerStore: Send + Sync + 'static {
    /// Finds the character owned by an account (token subject).
    ///
    /// Returns `Ok(None)` when the account has no character.
    fn get_player_by_user_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<PlayerRecord>, StoreError>> + Send;

    /// Finds a character by its id.
    fn get_player(
        &self,
        player_id: PlayerId,
    ) -> impl Future<Output = Result<Option<PlayerRecord>, StoreError>> + Send;

    /// Records that the character was active at `at_ms`.
    fn update_player_last_active(
        &self,
        player_id: PlayerId,
        at_ms: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Finds a room by id.
    fn get_room_by_id(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Option<RoomRecord>, StoreError>> + Send;
}
