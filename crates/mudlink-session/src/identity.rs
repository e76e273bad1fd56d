//! Token → player identity.
//!
//! The handshake and any reconnection check funnel through
//! [`IdentityValidator`]. It builds the single typed [`Identity`] value the
//! rest of the server uses; nothing downstream inspects raw claims.

use std::sync::Arc;

use mudlink_protocol::PlayerId;
use mudlink_store::PlayerStore;

use crate::{SessionError, TokenDecoder};

/// Who a socket belongs to, established once at the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The account (token subject).
    pub user_id: String,
    /// The character the account plays.
    pub player_id: PlayerId,
    /// Display name of the character.
    pub display_name: String,
}

/// Maps bearer tokens to players.
pub struct IdentityValidator<S: PlayerStore> {
    decoder: Arc<dyn TokenDecoder>,
    store: Option<Arc<S>>,
}

impl<S: PlayerStore> Clone for IdentityValidator<S> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
            store: self.store.clone(),
        }
    }
}

impl<S: PlayerStore> IdentityValidator<S> {
    /// Creates a validator. Without a store every token fails to resolve.
    pub fn new(decoder: Arc<dyn TokenDecoder>, store: Option<Arc<S>>) -> Self {
        Self { decoder, store }
    }

    /// Resolves a token to the identity it belongs to.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`] — decode failed or no subject
    /// - [`SessionError::StoreUnavailable`] — no store configured
    /// - [`SessionError::UnknownAccount`] — subject has no character
    /// - [`SessionError::Store`] — the lookup itself failed
    pub async fn resolve(&self, token: &str) -> Result<Identity, SessionError> {
        let claims = self.decoder.decode(token).ok_or(SessionError::InvalidToken)?;
        let user_id = claims.subject().ok_or(SessionError::InvalidToken)?;
        let store = self.store.as_ref().ok_or(SessionError::StoreUnavailable)?;

        let player = store
            .get_player_by_user_id(user_id)
            .await?
            .ok_or_else(|| SessionError::UnknownAccount(user_id.to_string()))?;

        Ok(Identity {
            user_id: user_id.to_string(),
            player_id: player.player_id,
            display_name: player.name,
        })
    }

    /// Resolves `token` and checks it belongs to `claimed`.
    ///
    /// # Errors
    /// Everything [`resolve`](Self::resolve) returns, plus
    /// [`SessionError::PlayerMismatch`] when the token is for someone else.
    pub async fn verify(&self, token: &str, claimed: PlayerId) -> Result<Identity, SessionError> {
        let identity = self.resolve(token).await?;
        // Compared by string form, matching how ids cross the wire.
        if identity.player_id.to_string() != claimed.to_string() {
            return Err(SessionError::PlayerMismatch(claimed));
        }
        Ok(identity)
    }

    /// Returns `true` only if `token` belongs to `claimed`.
    ///
    /// Fails closed: every error path, including a store failure, is
    /// `false`. This never panics and never returns an error, because an
    /// error escaping here could be mistaken for "valid".
    pub async fn validate(&self, token: &str, claimed: PlayerId) -> bool {
        match self.verify(token, claimed).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(player_id = %claimed, error = %e, "token validation failed");
                false
            }
        }
    }
}
