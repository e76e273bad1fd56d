//! Persistence interface for the mudlink connection core.
//!
//! The core consumes persistence through [`PlayerStore`] only. It reads
//! players (to resolve token subjects and starting rooms), reads rooms
//! (to canonicalize room ids), and writes a throttled "last active"
//! timestamp. [`MemoryStore`] is a complete in-process implementation.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
mod records;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use records::{PlayerRecord, RoomRecord};
pub use store::PlayerStore;
