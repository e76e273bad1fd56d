//! Error types for the session layer.

use mudlink_protocol::PlayerId;
use mudlink_store::StoreError;

/// Errors that can occur while establishing who a socket belongs to.
///
/// [`IdentityValidator::resolve`](crate::IdentityValidator::resolve) and
/// [`IdentityValidator::verify`](crate::IdentityValidator::verify) return
/// these. [`IdentityValidator::validate`](crate::IdentityValidator::validate)
/// collapses every one of them into `false`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token did not decode, is expired, or has no subject.
    #[error("invalid token")]
    InvalidToken,

    /// No persistence layer is configured, so the subject cannot be
    /// mapped to a player.
    #[error("no player store configured")]
    StoreUnavailable,

    /// The token subject has no character.
    #[error("no player for account {0}")]
    UnknownAccount(String),

    /// The token resolved to a different player than the one claimed.
    #[error("token does not belong to player {0}")]
    PlayerMismatch(PlayerId),

    /// The store failed while looking up the account.
    #[error(transparent)]
    Store(#[from] StoreError),
}
