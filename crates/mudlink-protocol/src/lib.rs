//! Wire protocol for mudlink.
//!
//! This crate defines what travels between the server and game clients:
//!
//! - **Identity** ([`PlayerId`], [`RoomId`], [`SessionId`]) — newtypes so
//!   a room id can never be passed where a player id is expected.
//! - **Events** ([`GameEvent`]) — server → client JSON objects.
//! - **Frames** ([`ClientFrame`]) — client → server JSON objects.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — bytes ⇄ values.
//! - **Optimizer** ([`PayloadOptimizer`], [`SizeLimitOptimizer`]) —
//!   normalization and the outbound size ceiling.
//!
//! ```text
//! Transport (bytes) → Protocol (frames/events) → Session/Room (who, where)
//! ```

mod codec;
mod error;
mod optimizer;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use optimizer::{
    normalize_payload, PayloadOptimizer, PayloadTooLarge, SizeLimitOptimizer,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use types::{
    unix_millis, ClientFrame, GameEvent, PlayerId, RoomId, SessionId,
};
