//! Game sessions and identity for mudlink.
//!
//! This crate answers two questions about a socket:
//!
//! 1. **Who is it?** — [`IdentityValidator`] turns a bearer token into an
//!    [`Identity`] through a [`TokenDecoder`] and the player store.
//! 2. **Which play session is it part of?** — [`SessionTracker`] records
//!    each player's current session and the sockets registered under it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Connection manager (above)  ← closes sockets, enforces one session per player
//!     ↕
//! Session layer (this crate)  ← identity and session bookkeeping
//!     ↕
//! Protocol / Store (below)    ← PlayerId, SessionId, PlayerStore
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod identity;
mod manager;
mod session;

pub use auth::{Claims, JwtDecoder, TokenDecoder};
pub use error::SessionError;
pub use identity::{Identity, IdentityValidator};
pub use manager::SessionTracker;
pub use session::{SessionResult, SessionState};
