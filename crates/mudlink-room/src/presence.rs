//! Room presence: which online players are believed to be in which room.
//!
//! Presence is DERIVED data. The authoritative facts are "is this player
//! online" (owned by the connection registry) and "which room did they
//! last enter". Presence can drift from the online set when a socket dies
//! between two events, so every reader that cares about accuracy calls
//! [`RoomPresence::reconcile`] first.

use std::collections::{BTreeSet, HashMap};

use mudlink_protocol::{PlayerId, RoomId};

/// Tracks room occupancy.
///
/// Two maps are kept in sync:
///
/// ```text
/// rooms:        RoomId   → {PlayerId, ...}
/// player_rooms: PlayerId → RoomId          (a player is in at most ONE room)
/// ```
///
/// Rooms with no occupants are removed, so `rooms` never holds an empty
/// set.
#[derive(Debug, Default)]
pub struct RoomPresence {
    rooms: HashMap<RoomId, BTreeSet<PlayerId>>,
    player_rooms: HashMap<PlayerId, RoomId>,
}

impl RoomPresence {
    /// Creates an empty presence index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a player in a room, taking them out of any previous room.
    ///
    /// Returns the room they left, if it was a different one.
    pub fn enter(&mut self, player_id: PlayerId, room_id: RoomId) -> Option<RoomId> {
        let previous = self.player_rooms.insert(player_id, room_id.clone());
        if let Some(old) = &previous {
            if *old != room_id {
                self.remove_from_room(old, &player_id);
            }
        }
        self.rooms.entry(room_id.clone()).or_default().insert(player_id);

        tracing::debug!(%player_id, %room_id, "player entered room");
        previous.filter(|old| *old != room_id)
    }

    /// Takes a player out of one specific room.
    ///
    /// Returns `false` if they were not in it.
    pub fn leave(&mut self, player_id: &PlayerId, room_id: &RoomId) -> bool {
        if self.player_rooms.get(player_id) != Some(room_id) {
            return false;
        }
        self.player_rooms.remove(player_id);
        self.remove_from_room(room_id, player_id);
        tracing::debug!(%player_id, %room_id, "player left room");
        true
    }

    /// Removes a player from EVERY room, not just the one the index
    /// says they are in. Used on disconnect and session replacement.
    ///
    /// Returns the number of rooms they were removed from.
    pub fn prune_player(&mut self, player_id: &PlayerId) -> usize {
        self.player_rooms.remove(player_id);
        let mut removed = 0;
        self.rooms.retain(|_, occupants| {
            if occupants.remove(player_id) {
                removed += 1;
            }
            !occupants.is_empty()
        });
        removed
    }

    /// Drops every occupant of `room_id` for whom `is_online` is false.
    ///
    /// Returns the players that were pruned.
    pub fn reconcile<F>(&mut self, room_id: &RoomId, is_online: F) -> Vec<PlayerId>
    where
        F: Fn(&PlayerId) -> bool,
    {
        let Some(occupants) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        let stale: Vec<PlayerId> = occupants
            .iter()
            .filter(|p| !is_online(p))
            .copied()
            .collect();
        for player_id in &stale {
            occupants.remove(player_id);
        }
        if occupants.is_empty() {
            self.rooms.remove(room_id);
        }
        for player_id in &stale {
            if self.player_rooms.get(player_id) == Some(room_id) {
                self.player_rooms.remove(player_id);
            }
            tracing::debug!(%player_id, %room_id, "pruned offline occupant");
        }
        stale
    }

    /// Runs [`reconcile`](Self::reconcile) for every room.
    pub fn reconcile_all<F>(&mut self, is_online: F) -> Vec<PlayerId>
    where
        F: Fn(&PlayerId) -> bool,
    {
        let room_ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        room_ids
            .iter()
            .flat_map(|room_id| self.reconcile(room_id, &is_online))
            .collect()
    }

    /// Returns the occupants of a room in a stable order.
    pub fn occupants(&self, room_id: &RoomId) -> Vec<PlayerId> {
        self.rooms
            .get(room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the room a player is in.
    pub fn room_of(&self, player_id: &PlayerId) -> Option<&RoomId> {
        self.player_rooms.get(player_id)
    }

    /// Returns `true` if the player is listed in the room.
    pub fn contains(&self, room_id: &RoomId, player_id: &PlayerId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|set| set.contains(player_id))
    }

    /// Number of rooms with at least one occupant.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of players placed in some room.
    pub fn occupant_count(&self) -> usize {
        self.player_rooms.len()
    }

    fn remove_from_room(&mut self, room_id: &RoomId, player_id: &PlayerId) {
        if let Some(occupants) = self.rooms.get_mut(room_id) {
            occupants.remove(player_id);
            if occupants.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }
}
