//! Message delivery: personal messages, room broadcasts, global broadcasts.
//!
//! Every outbound event goes through the same three steps:
//!
//! 1. **Prepare**: normalize to a JSON value (ids become strings), then
//!    run the [`PayloadOptimizer`]. An oversized payload is swapped for a
//!    `payload_too_large` error event.
//! 2. **Fan out**: copy the player's sockets under the registry lock,
//!    release it, then send to each. A failed send reaps that socket on
//!    the spot. It is never retried.
//! 3. **Fallback**: if no socket took the event, queue it for the
//!    player's next connection.

use std::collections::BTreeMap;

use mudlink_protocol::{
    normalize_payload, GameEvent, PayloadOptimizer, PlayerId, ProtocolError, RoomId,
};
use mudlink_store::PlayerStore;
use mudlink_transport::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::ConnectionManager;

/// Outcome of delivering one event to one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatus {
    /// `true` if a socket took the event, or if nobody was connected and
    /// it was queued. `false` only when sends were attempted and all
    /// failed (or the event could not be serialized).
    pub success: bool,
    pub websocket_delivered: usize,
    pub websocket_failed: usize,
    /// Sockets registered for the player when delivery started.
    pub total_connections: usize,
    /// Sockets that accepted the event.
    pub active_connections: usize,
}

/// Outcome of a room or global broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastResult {
    /// Players the broadcast was computed over, excluded ones included.
    pub total_targets: usize,
    /// Players skipped because they were the excluded sender.
    pub excluded_players: usize,
    /// Players whose delivery reported success.
    pub successful_deliveries: usize,
    /// Players whose delivery reported failure.
    pub failed_deliveries: usize,
    /// Per-player detail for every player delivery was attempted for.
    pub delivery_details: BTreeMap<PlayerId, DeliveryStatus>,
    /// Set when the broadcast could not be computed at all. All counts
    /// are zero in that case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn record(&mut self, player_id: PlayerId, status: DeliveryStatus) {
        if status.success {
            self.successful_deliveries += 1;
        } else {
            self.failed_deliveries += 1;
        }
        self.delivery_details.insert(player_id, status);
    }
}

/// A payload ready to go out: the value (what gets queued) and its
/// serialized text (what gets sent).
pub(crate) struct PreparedPayload {
    pub value: Value,
    pub text: String,
}

/// Normalizes and optimizes an event.
///
/// # Errors
/// Returns `ProtocolError::Encode` if the event (or the replacement error
/// event) cannot be serialized.
pub(crate) fn prepare_payload<E: Serialize>(
    event: &E,
    optimizer: &dyn PayloadOptimizer,
) -> Result<PreparedPayload, ProtocolError> {
    let normalized = normalize_payload(event)?;
    let value = match optimizer.optimize(normalized) {
        Ok(value) => value,
        Err(too_large) => {
            tracing::warn!(
                size = too_large.size,
                max = too_large.max,
                "payload too large, sending error event instead"
            );
            normalize_payload(&GameEvent::error("payload_too_large", too_large.to_string()))?
        }
    };
    let text = serde_json::to_string(&value).map_err(ProtocolError::Encode)?;
    Ok(PreparedPayload { value, text })
}

impl<C: Connection, S: PlayerStore> ConnectionManager<C, S> {
    /// Sends an event to every socket of one player.
    ///
    /// Never fails. See [`DeliveryStatus`] for how the outcome is
    /// reported; a player with no sockets gets the event queued.
    pub async fn send_personal_message<E: Serialize>(
        &self,
        player_id: PlayerId,
        event: &E,
    ) -> DeliveryStatus {
        match prepare_payload(event, self.optimizer.as_ref()) {
            Ok(payload) => self.deliver_prepared(player_id, &payload).await,
            Err(e) => {
                tracing::error!(%player_id, error = %e, "failed to serialize personal message");
                DeliveryStatus::default()
            }
        }
    }

    /// Sends an event to every online occupant of a room.
    ///
    /// The room id is canonicalized and the room's presence reconciled
    /// against the online set first, so players who dropped without a
    /// clean disconnect are not targeted.
    pub async fn broadcast_to_room<E: Serialize>(
        &self,
        room_id: &RoomId,
        event: &E,
        exclude_player: Option<PlayerId>,
    ) -> BroadcastResult {
        let payload = match prepare_payload(event, self.optimizer.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%room_id, error = %e, "failed to serialize room broadcast");
                return BroadcastResult::failed(e.to_string());
            }
        };
        let room_id = self.canonical_room_id(room_id.as_str()).await;
        let targets = self.reconciled_occupants(&room_id).await;

        tracing::debug!(%room_id, targets = targets.len(), "room broadcast");
        self.fan_out(targets, exclude_player, &payload).await
    }

    /// Sends an event to every online player.
    pub async fn broadcast_global<E: Serialize>(
        &self,
        event: &E,
        exclude_player: Option<PlayerId>,
    ) -> BroadcastResult {
        let payload = match prepare_payload(event, self.optimizer.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize global broadcast");
                return BroadcastResult::failed(e.to_string());
            }
        };
        let targets = self.registry.lock().await.online_player_ids();

        tracing::debug!(targets = targets.len(), "global broadcast");
        self.fan_out(targets, exclude_player, &payload).await
    }

    async fn fan_out(
        &self,
        targets: Vec<PlayerId>,
        exclude_player: Option<PlayerId>,
        payload: &PreparedPayload,
    ) -> BroadcastResult {
        let mut result = BroadcastResult {
            total_targets: targets.len(),
            ..BroadcastResult::default()
        };
        for player_id in targets {
            if Some(player_id) == exclude_player {
                result.excluded_players += 1;
                continue;
            }
            let status = self.deliver_prepared(player_id, payload).await;
            result.record(player_id, status);
        }
        result
    }

    /// Delivers an already-prepared payload to one player.
    pub(crate) async fn deliver_prepared(
        &self,
        player_id: PlayerId,
        payload: &PreparedPayload,
    ) -> DeliveryStatus {
        // Copy before suspending: reaping below mutates the live list.
        let targets = self.registry.lock().await.handles_for(&player_id);
        let mut status = DeliveryStatus {
            total_connections: targets.len(),
            ..DeliveryStatus::default()
        };

        for (connection_id, handle) in targets {
            let Some(handle) = handle else {
                continue;
            };
            match handle.send_text(&payload.text).await {
                Ok(()) => {
                    status.websocket_delivered += 1;
                    status.active_connections += 1;
                }
                Err(e) => {
                    status.websocket_failed += 1;
                    tracing::warn!(
                        %player_id,
                        %connection_id,
                        error = %e,
                        "send failed, reaping connection"
                    );
                    self.cleanup_dead(player_id, &connection_id).await;
                }
            }
        }

        if status.active_connections == 0 {
            self.pending
                .lock()
                .await
                .push(player_id, payload.value.clone());
            tracing::debug!(%player_id, "no live connection, message queued");
        }

        status.success = status.active_connections > 0 || status.websocket_failed == 0;
        status
    }
}
