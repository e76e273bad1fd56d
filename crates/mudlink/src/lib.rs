//! # Mudlink
//!
//! Real-time connection core for a multiplayer text game.
//!
//! Mudlink tracks every live WebSocket a player has open and answers three
//! questions for the rest of the server: who is online, which room they
//! are in, and how to get an event to them. The game layer publishes
//! events; mudlink handles sockets, sessions, room presence, delivery,
//! queuing for offline players, and reaping of dead connections.
//!
//! ## Layers
//!
//! ```text
//! mudlink-transport   WebSocket sockets (Connection trait)
//! mudlink-protocol    GameEvent / ClientFrame, codec, payload optimizer
//! mudlink-store       PlayerStore trait + in-memory store
//! mudlink-session     SessionTracker, token decoding, identity
//! mudlink-room        RoomPresence, room id resolution
//! mudlink             ConnectionManager + WebSocket server
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mudlink::prelude::*;
//!
//! # async fn run() -> Result<(), MudlinkError> {
//! let server = MudlinkServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .store(Arc::new(MemoryStore::new()))
//!     .build(JwtDecoder::new(b"change-me"))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod audit;
mod config;
mod delivery;
mod error;
mod events;
mod handler;
mod health;
mod last_active;
pub mod logging;
mod manager;
mod pending;
mod rate_limit;
mod reaper;
mod registry;
mod server;

pub use audit::LoginAuditRecord;
pub use config::ManagerConfig;
pub use delivery::{BroadcastResult, DeliveryStatus};
pub use error::MudlinkError;
pub use events::{EventBus, EventTarget, RoutedEvent};
pub use health::HealthReport;
pub use logging::init_tracing;
pub use manager::{
    ConnectOutcome, ConnectionManager, REASON_NEW_LOGIN, REASON_NEW_SESSION, REASON_SHUTDOWN,
};
pub use rate_limit::{RateLimiter, WindowRateLimiter};
pub use reaper::{CleanupReport, REASON_INACTIVITY};
pub use registry::{ConnectionMetadata, OnlineRecord};
pub use server::{
    MudlinkServer, MudlinkServerBuilder, PlayerCommand, WsConnectionManager,
    COMMAND_QUEUE_CAPACITY,
};

/// Convenient re-exports for typical usage.
///
/// ```rust
/// use mudlink::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BroadcastResult, ConnectOutcome, ConnectionManager, DeliveryStatus, EventBus,
        EventTarget, HealthReport, ManagerConfig, MudlinkError, MudlinkServer,
        MudlinkServerBuilder, PlayerCommand, RateLimiter, RoutedEvent, WindowRateLimiter,
        init_tracing,
    };
    pub use mudlink_protocol::{
        ClientFrame, Codec, GameEvent, JsonCodec, PayloadOptimizer, PlayerId, RoomId,
        SessionId, SizeLimitOptimizer,
    };
    pub use mudlink_room::RoomDirectory;
    pub use mudlink_session::{
        Identity, JwtDecoder, SessionResult, SessionState, TokenDecoder,
    };
    pub use mudlink_store::{MemoryStore, PlayerRecord, PlayerStore, RoomRecord};
    pub use mudlink_transport::{Connection, ConnectionId, SocketState, WebSocketConnection};
}
