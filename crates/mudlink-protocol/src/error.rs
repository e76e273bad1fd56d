//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError`, the problem is in turning events into
//! bytes or bytes into frames, not in networking or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into JSON).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a frame).
    ///
    /// Common causes: malformed JSON, an unknown `type` tag, or a
    /// missing required field.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but breaks a protocol rule, e.g. a command
    /// arriving before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
