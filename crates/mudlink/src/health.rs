//! Connection health statistics and the background health monitor.

use std::sync::Weak;
use std::time::Instant;

use mudlink_store::PlayerStore;
use mudlink_transport::Connection;
use serde::Serialize;

use crate::ConnectionManager;

/// A snapshot of the connection core.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    /// Sockets in the registry.
    pub total_connections: usize,
    /// Sockets whose state is `Connected`.
    pub healthy_connections: usize,
    /// Sockets registered but no longer `Connected`.
    pub unhealthy_connections: usize,
    /// Sockets whose player has not been seen within
    /// `stale_player_after`.
    pub stale_connections: usize,
    pub online_players: usize,
    pub active_sessions: usize,
    pub occupied_rooms: usize,
    /// Queued messages across all players.
    pub pending_messages: usize,
    /// Players with at least one queued message.
    pub pending_players: usize,
    pub oldest_connection_secs: f64,
    pub average_connection_age_secs: f64,
}

impl<C: Connection, S: PlayerStore> ConnectionManager<C, S> {
    /// Computes a fresh health report.
    pub async fn health_report(&self) -> HealthReport {
        let now = Instant::now();
        let stale_after = self.config.stale_player_after;

        let mut report = HealthReport::default();
        {
            let registry = self.registry.lock().await;
            report.total_connections = registry.connection_count();
            report.online_players = registry.player_count();
            report.healthy_connections = registry
                .all_handles()
                .iter()
                .filter(|(_, _, handle)| handle.state().is_connected())
                .count();

            let mut total_age = 0.0;
            let mut count = 0usize;
            for (_, meta) in registry.all_metadata() {
                let age = now.saturating_duration_since(meta.created_at).as_secs_f64();
                total_age += age;
                count += 1;
                report.oldest_connection_secs = report.oldest_connection_secs.max(age);
                if now.saturating_duration_since(meta.last_seen) > stale_after {
                    report.stale_connections += 1;
                }
            }
            if count > 0 {
                report.average_connection_age_secs = total_age / count as f64;
            }
        }
        report.unhealthy_connections = report.total_connections - report.healthy_connections;
        report.active_sessions = self.sessions.lock().await.len();
        report.occupied_rooms = self.presence.lock().await.room_count();
        {
            let pending = self.pending.lock().await;
            report.pending_messages = pending.total();
            report.pending_players = pending.player_count();
        }
        report
    }

    /// Returns the report stored by the last health monitor run.
    ///
    /// If the monitor was never started this is a configuration gap: it
    /// is logged as an error and `default` is returned. A started monitor
    /// that has not finished its first run also yields `default`.
    pub async fn latest_health_report_or(&self, default: HealthReport) -> HealthReport {
        if !self.is_running() {
            tracing::error!("health monitor not started, returning default report");
            return default;
        }
        self.latest_health
            .lock()
            .await
            .clone()
            .unwrap_or(default)
    }

    /// One health monitor pass: reap dead sockets, prune stale players,
    /// then record and log a fresh report.
    pub async fn run_health_check(&self) -> HealthReport {
        let reaped = self.reap_dead_connections().await;
        let pruned = self.prune_stale_players().await;
        let report = self.health_report().await;

        tracing::info!(
            connections = report.total_connections,
            healthy = report.healthy_connections,
            online = report.online_players,
            rooms = report.occupied_rooms,
            pending = report.pending_messages,
            reaped,
            pruned,
            "connection health"
        );
        *self.latest_health.lock().await = Some(report.clone());
        report
    }
}

/// Runs [`ConnectionManager::run_health_check`] on an interval until the
/// manager is dropped.
pub(crate) async fn run_monitor<C: Connection, S: PlayerStore>(
    manager: Weak<ConnectionManager<C, S>>,
) {
    let Some(interval) = manager
        .upgrade()
        .map(|m| m.config.health_check_interval)
    else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.run_health_check().await;
    }
    tracing::debug!("health monitor stopped");
}
