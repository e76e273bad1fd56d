//! Unified error type for mudlink.

use mudlink_protocol::ProtocolError;
use mudlink_room::RoomError;
use mudlink_session::SessionError;
use mudlink_store::StoreError;
use mudlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The [`ConnectionManager`](crate::ConnectionManager) itself never
/// returns this: its operations degrade to structured results
/// (`DeliveryStatus`, `SessionResult`, `false`). `MudlinkError` shows up
/// only at the edges that can genuinely fail, such as binding the server
/// or driving one socket's handler.
#[derive(Debug, thiserror::Error)]
pub enum MudlinkError {
    /// A transport-level error (bind, send, recv, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An identity error (bad token, unknown account).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room lookup error.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
