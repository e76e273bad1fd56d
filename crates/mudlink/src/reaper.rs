//! Dead-connection reaping and the disconnect paths built on it.
//!
//! Every way a socket leaves the system ends in [`cleanup_dead`]:
//!
//! - a send fails during delivery
//! - the connection handler exits (`disconnect_websocket`)
//! - the player is force-disconnected (new login, shutdown, inactivity)
//! - the health monitor finds a socket that is no longer `Connected`
//!
//! The handle is taken out of the registry under the lock. Only the caller
//! that took it closes it, so two reapers racing on the same socket close
//! it once.
//!
//! [`cleanup_dead`]: ConnectionManager::cleanup_dead

use std::time::Instant;

use mudlink_protocol::PlayerId;
use mudlink_store::PlayerStore;
use mudlink_transport::{Connection, ConnectionId};
use serde::Serialize;

use crate::delivery::prepare_payload;
use crate::manager::disconnect_notice;
use crate::ConnectionManager;

/// Reason sent to players pruned for inactivity.
pub const REASON_INACTIVITY: &str = "inactivity timeout";

/// Close errors that only mean someone else closed the socket first.
const BENIGN_CLOSE_ERRORS: &[&str] = &[
    "already closed",
    "close message has been sent",
    "response already completed",
    "connection closed",
];

/// How a graceful close ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Closed,
    /// The socket was not `Connected`, or the close raced another one.
    AlreadyClosed,
    TimedOut,
    Failed(String),
}

/// Counts returned by [`ConnectionManager::cleanup_orphaned_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub orphaned_metadata: usize,
    pub orphaned_index_entries: usize,
    pub expired_pending_queues: usize,
    pub stale_presence_entries: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.orphaned_metadata
            + self.orphaned_index_entries
            + self.expired_pending_queues
            + self.stale_presence_entries
    }
}

fn is_benign_close_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    BENIGN_CLOSE_ERRORS.iter().any(|s| message.contains(s))
}

impl<C: Connection, S: PlayerStore> ConnectionManager<C, S> {
    /// Removes one socket from every index and closes it.
    ///
    /// Safe to call any number of times: unknown ids are a no-op, and
    /// nothing here fails the caller. When this was the player's last
    /// socket the player goes offline and leaves room presence.
    pub async fn cleanup_dead(&self, player_id: PlayerId, connection_id: &ConnectionId) {
        let removed = {
            let mut registry = self.registry.lock().await;
            let removed = registry.remove(&player_id, connection_id);
            self.sessions.lock().await.detach(connection_id);
            if removed.player_went_offline {
                self.presence.lock().await.prune_player(&player_id);
            }
            removed
        };

        if let Some(handle) = &removed.handle {
            self.graceful_close(&player_id, connection_id, handle).await;
        }
        self.rate_limiter.remove_connection_message_data(connection_id);

        if removed.player_went_offline {
            self.rate_limiter.remove_player_data(&player_id);
            self.throttle.lock().await.forget(&player_id);
            tracing::info!(%player_id, %connection_id, "player went offline");
        } else if removed.handle.is_some() {
            tracing::debug!(%player_id, %connection_id, "connection reaped");
        }
    }

    /// Closes a socket within `close_timeout`.
    ///
    /// Sockets that are not `Connected` are skipped. Benign double-close
    /// errors are logged at debug, anything else at warn. Never fails.
    pub(crate) async fn graceful_close(
        &self,
        player_id: &PlayerId,
        connection_id: &ConnectionId,
        handle: &C,
    ) -> CloseOutcome {
        if !handle.state().is_connected() {
            return CloseOutcome::AlreadyClosed;
        }
        match tokio::time::timeout(self.config.close_timeout, handle.close()).await {
            Ok(Ok(())) => CloseOutcome::Closed,
            Ok(Err(e)) => {
                let message = e.to_string();
                if is_benign_close_error(&message) {
                    tracing::debug!(%player_id, %connection_id, error = %message, "close raced");
                    CloseOutcome::AlreadyClosed
                } else {
                    tracing::warn!(%player_id, %connection_id, error = %message, "close failed");
                    CloseOutcome::Failed(message)
                }
            }
            Err(_) => {
                tracing::warn!(
                    %player_id,
                    %connection_id,
                    timeout_ms = self.config.close_timeout.as_millis() as u64,
                    "close timed out"
                );
                CloseOutcome::TimedOut
            }
        }
    }

    /// The normal close path for a socket that ended.
    ///
    /// Returns `false` if the socket was not registered.
    pub async fn disconnect_websocket(&self, connection_id: &ConnectionId) -> bool {
        let owner = self.registry.lock().await.owner_of(connection_id);
        match owner {
            Some(player_id) => {
                self.cleanup_dead(player_id, connection_id).await;
                true
            }
            None => {
                self.sessions.lock().await.detach(connection_id);
                self.rate_limiter.remove_connection_message_data(connection_id);
                false
            }
        }
    }

    /// Tells every socket of a player why it is being dropped, then reaps
    /// them all. Returns how many sockets were reaped.
    pub async fn force_disconnect_player(&self, player_id: PlayerId, reason: &str) -> usize {
        let targets = self.registry.lock().await.handles_for(&player_id);
        if targets.is_empty() {
            return 0;
        }

        let notice = prepare_payload(&disconnect_notice(player_id, reason), self.optimizer.as_ref());
        for (connection_id, handle) in &targets {
            if let (Some(handle), Ok(notice)) = (handle, &notice) {
                if let Err(e) = handle.send_text(&notice.text).await {
                    tracing::debug!(%player_id, %connection_id, error = %e, "disconnect notice not delivered");
                }
            }
            self.cleanup_dead(player_id, connection_id).await;
        }

        tracing::info!(%player_id, reason, connections = targets.len(), "player force-disconnected");
        targets.len()
    }

    /// Reaps every registered socket whose state is no longer
    /// `Connected`. Returns how many were reaped.
    pub async fn reap_dead_connections(&self) -> usize {
        let dead: Vec<(ConnectionId, PlayerId)> = self
            .registry
            .lock()
            .await
            .all_handles()
            .into_iter()
            .filter(|(_, _, handle)| !handle.state().is_connected())
            .map(|(connection_id, player_id, _)| (connection_id, player_id))
            .collect();

        for (connection_id, player_id) in &dead {
            self.cleanup_dead(*player_id, connection_id).await;
        }
        if !dead.is_empty() {
            tracing::info!(reaped = dead.len(), "dead connections reaped");
        }
        dead.len()
    }

    /// Disconnects players not seen for `stale_player_after`. Returns how
    /// many players were pruned.
    pub async fn prune_stale_players(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.config.stale_player_after) else {
            return 0;
        };
        let stale = self.registry.lock().await.stale_players(cutoff);
        for player_id in &stale {
            self.force_disconnect_player(*player_id, REASON_INACTIVITY).await;
        }
        stale.len()
    }

    /// Sweeps bookkeeping that no longer matches a live socket.
    pub async fn cleanup_orphaned_data(&self) -> CleanupReport {
        let cutoff = Instant::now().checked_sub(self.config.stale_player_after);

        let registry_counts;
        let stale_presence;
        let expired_pending;
        {
            let mut registry = self.registry.lock().await;
            registry_counts = registry.remove_orphans();
            stale_presence = self
                .presence
                .lock()
                .await
                .reconcile_all(|p| registry.is_online(p))
                .len();
            expired_pending = match cutoff {
                Some(cutoff) => self
                    .pending
                    .lock()
                    .await
                    .remove_expired(cutoff, |p| registry.is_online(p)),
                None => 0,
            };
        }

        let report = CleanupReport {
            orphaned_metadata: registry_counts.metadata,
            orphaned_index_entries: registry_counts.index_entries,
            expired_pending_queues: expired_pending,
            stale_presence_entries: stale_presence,
        };
        if report.total() > 0 {
            tracing::info!(
                metadata = report.orphaned_metadata,
                index_entries = report.orphaned_index_entries,
                pending = report.expired_pending_queues,
                presence = report.stale_presence_entries,
                "orphaned data cleaned up"
            );
        }
        report
    }
}
