//! Transport abstraction layer for mudlink.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the connection
//! manager is written against, plus a WebSocket implementation.
//!
//! The manager never probes a socket by sending to it to learn whether it
//! is alive. Every [`Connection`] reports a [`SocketState`] instead, and
//! the manager compares that state before attempting a graceful close.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;

use rand::Rng;

/// Opaque identifier for one live socket.
///
/// Generated ids are 32 lowercase hex characters (128 random bits), so
/// they are unique for the lifetime of the process without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a socket as seen by the server.
///
/// ```text
/// Connecting ──→ Connected ──→ Closing ──→ Closed
///                    │                       ↑
///                    └───(peer hung up)──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Upgrade in progress.
    Connecting,
    /// Open and usable for sends.
    Connected,
    /// A close frame has been sent or received.
    Closing,
    /// Fully closed. Sends will fail.
    Closed,
}

impl SocketState {
    /// Returns `true` if the socket can still carry frames.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Packs the state into a byte for atomic storage.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    /// Inverse of [`as_u8`](Self::as_u8). Unknown values map to `Closed`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single socket that can send and receive frames.
///
/// Implementations must be usable from several tasks at once: the
/// connection handler sits in `recv()` while the manager calls `send_text()`
/// from broadcast tasks. `send` and `recv` must therefore not share a lock.
///
/// The returned futures are `Send` so the manager, which is generic over
/// the connection type, can drive them from spawned tasks.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends binary data to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sends a text frame (JSON events go out this way).
    ///
    /// Defaults to a binary send of the UTF-8 bytes.
    fn send_text(&self, text: &str) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.send(text.as_bytes())
    }

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the current socket state without touching the network.
    fn state(&self) -> SocketState;
}
