//! Error types for the room layer.

use mudlink_store::StoreError;

/// Errors a [`RoomLookup`](crate::RoomLookup) may report. A room that
/// does not exist is `Ok(None)`, not an error.
///
/// [`canonical_room_id`](crate::canonical_room_id) swallows these and
/// falls back to the raw id, so they only surface to code that calls a
/// lookup directly.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room directory could not be consulted.
    #[error("room lookup failed: {0}")]
    Lookup(String),

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
