//! Rows the connection core reads from persistence.

use mudlink_protocol::{PlayerId, RoomId};

/// A player character as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Primary key of the character.
    pub player_id: PlayerId,
    /// The account (token subject) that owns this character.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Where the character was last saved, if anywhere.
    pub current_room_id: Option<RoomId>,
    /// Last persisted activity, milliseconds since the UNIX epoch.
    pub last_active_ms: Option<u64>,
}

/// A room as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    /// Canonical room id.
    pub id: RoomId,
    /// Display name shown to players.
    pub name: String,
}
