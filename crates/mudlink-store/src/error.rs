//! Error types for the persistence layer.

/// Errors a [`PlayerStore`](crate::PlayerStore) may report.
///
/// The connection core never lets these escape to its callers: lookups
/// fall back to a default, token checks fail closed, and last-active
/// writes are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A query ran and failed.
    #[error("query failed: {0}")]
    Query(String),
}
