//! Payload normalization and size limiting.
//!
//! Before an event goes out, it passes two steps:
//!
//! 1. [`normalize_payload`] turns any `Serialize` value into a
//!    `serde_json::Value`. Identifier types (`PlayerId`, raw `Uuid`s)
//!    serialize as strings, so after this step every id in the payload is
//!    a plain string.
//! 2. A [`PayloadOptimizer`] trims the value and rejects it if it is
//!    still larger than the configured maximum. Rejection is a normal
//!    return value ([`PayloadTooLarge`]), not a panic or an unwind: the
//!    caller swaps in a `payload_too_large` error event and carries on.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Default maximum serialized payload size: 100 KiB.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024;

/// Converts a serializable event into its JSON value form.
///
/// # Errors
/// Returns `ProtocolError::Encode` if the value cannot be represented as
/// JSON (e.g. a map with non-string keys).
pub fn normalize_payload<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(ProtocolError::Encode)
}

/// The payload is larger than the optimizer allows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload of {size} bytes exceeds maximum of {max} bytes")]
pub struct PayloadTooLarge {
    /// Serialized size after optimization.
    pub size: usize,
    /// Configured maximum.
    pub max: usize,
}

/// Shrinks outbound payloads and enforces a size ceiling.
pub trait PayloadOptimizer: Send + Sync + 'static {
    /// Returns the optimized payload, or [`PayloadTooLarge`] if it still
    /// exceeds the maximum.
    fn optimize(&self, payload: Value) -> Result<Value, PayloadTooLarge>;
}

/// Drops `null` object fields and enforces a byte ceiling.
///
/// Nulls inside arrays are kept because array positions carry meaning.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimitOptimizer {
    max_bytes: usize,
}

impl SizeLimitOptimizer {
    /// Creates an optimizer with the given ceiling in bytes.
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Returns the configured ceiling.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for SizeLimitOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl PayloadOptimizer for SizeLimitOptimizer {
    fn optimize(&self, payload: Value) -> Result<Value, PayloadTooLarge> {
        let trimmed = strip_null_fields(payload);
        let size = serde_json::to_string(&trimmed).map_or(0, |s| s.len());
        if size > self.max_bytes {
            return Err(PayloadTooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(trimmed)
    }
}

fn strip_null_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_null_fields(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_null_fields).collect())
        }
        other => other,
    }
}
