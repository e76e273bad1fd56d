//! Room presence for mudlink.
//!
//! The connection core needs to answer "who should receive a message sent
//! to room X?". This crate holds the two pieces that answer it:
//!
//! - [`RoomPresence`] — the occupancy index (room → players, player → room)
//! - [`canonical_room_id`] — maps a raw room id to its canonical form
//!   through a [`RoomLookup`] chain ([`RoomDirectory`], then
//!   [`StoreRoomLookup`]) before it is used as a presence key
//!
//! Game rules for rooms (exits, descriptions, combat) live in the game
//! server, not here.

#![allow(async_fn_in_trait)]

mod error;
mod presence;
mod resolve;

pub use error::RoomError;
pub use presence::RoomPresence;
pub use resolve::{canonical_room_id, RoomDirectory, RoomLookup, StoreRoomLookup};
