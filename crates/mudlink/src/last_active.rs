//! Throttled "last active" persistence.
//!
//! Every ping marks a player as seen in memory, but the store only needs
//! to hear about it once per interval. Two pieces split that job:
//!
//! - [`LastActiveThrottle`] decides whether a write is due.
//! - [`LastActiveWriter`] hands due writes to a single background worker
//!   over a bounded channel. A full channel drops the request; a failed
//!   store call is logged by the worker. Neither reaches the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mudlink_protocol::PlayerId;
use mudlink_store::PlayerStore;
use tokio::sync::mpsc;

/// Per-player minimum-interval check.
pub(crate) struct LastActiveThrottle {
    interval: Duration,
    last_persisted: HashMap<PlayerId, Instant>,
}

impl LastActiveThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_persisted: HashMap::new(),
        }
    }

    /// Returns `true` and records `now` if the player is due a write.
    ///
    /// The recorded instant only moves forward, so concurrent sockets of
    /// one player cannot roll it back and trigger a second write.
    pub fn should_persist(&mut self, player_id: PlayerId, now: Instant) -> bool {
        match self.last_persisted.get_mut(&player_id) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            Some(last) => {
                *last = (*last).max(now);
                true
            }
            None => {
                self.last_persisted.insert(player_id, now);
                true
            }
        }
    }

    pub fn forget(&mut self, player_id: &PlayerId) {
        self.last_persisted.remove(player_id);
    }

    #[cfg(test)]
    pub(crate) fn last(&self, player_id: &PlayerId) -> Option<Instant> {
        self.last_persisted.get(player_id).copied()
    }
}

/// One pending write: who, and when (ms since the UNIX epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastActiveUpdate {
    pub player_id: PlayerId,
    pub at_ms: u64,
}

/// Receiving end of the write queue, consumed by [`run_worker`].
pub(crate) type LastActiveQueue = mpsc::Receiver<LastActiveUpdate>;

/// Sending end of the write queue.
#[derive(Clone)]
pub(crate) struct LastActiveWriter {
    tx: mpsc::Sender<LastActiveUpdate>,
}

impl LastActiveWriter {
    /// Creates the queue. The receiver sits idle until a worker is
    /// started on it.
    pub fn channel(capacity: usize) -> (Self, LastActiveQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a write without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, player_id: PlayerId, at_ms: u64) -> bool {
        match self.tx.try_send(LastActiveUpdate { player_id, at_ms }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(%player_id, "last-active queue full, dropping update");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%player_id, "last-active worker stopped, dropping update");
                false
            }
        }
    }
}

/// Drains the queue into the store until every sender is gone.
pub(crate) async fn run_worker<S: PlayerStore>(mut rx: LastActiveQueue, store: Arc<S>) {
    while let Some(update) = rx.recv().await {
        if let Err(e) = store
            .update_player_last_active(update.player_id, update.at_ms)
            .await
        {
            tracing::warn!(
                player_id = %update.player_id,
                error = %e,
                "failed to persist last-active timestamp"
            );
        }
    }
    tracing::debug!("last-active worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudlink_store::{MemoryStore, PlayerRecord};

    #[test]
    fn test_should_persist_respects_interval() {
        let mut throttle = LastActiveThrottle::new(Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let start = Instant::now();

        assert!(throttle.should_persist(p, start));
        assert!(!throttle.should_persist(p, start + Duration::from_secs(30)));
        assert!(throttle.should_persist(p, start + Duration::from_secs(61)));
    }

    #[test]
    fn test_should_persist_older_instant_does_not_roll_back() {
        let mut throttle = LastActiveThrottle::new(Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let start = Instant::now();
        throttle.should_persist(p, start + Duration::from_secs(120));

        assert!(!throttle.should_persist(p, start));
        assert_eq!(throttle.last(&p), Some(start + Duration::from_secs(120)));
    }

    #[test]
    fn test_forget_allows_immediate_write() {
        let mut throttle = LastActiveThrottle::new(Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let now = Instant::now();
        throttle.should_persist(p, now);

        throttle.forget(&p);

        assert!(throttle.should_persist(p, now));
    }

    #[test]
    fn test_enqueue_full_queue_drops() {
        let (writer, _rx) = LastActiveWriter::channel(1);
        let p = PlayerId::new_v4();

        assert!(writer.enqueue(p, 1));
        assert!(!writer.enqueue(p, 2));
    }

    #[tokio::test]
    async fn test_run_worker_persists_updates() {
        let store = Arc::new(MemoryStore::new());
        let p = PlayerId::new_v4();
        store.insert_player(PlayerRecord {
            player_id: p,
            user_id: "u".into(),
            name: "Armitage".into(),
            current_room_id: None,
            last_active_ms: None,
        });
        let (writer, rx) = LastActiveWriter::channel(8);

        writer.enqueue(p, 1_000);
        writer.enqueue(PlayerId::new_v4(), 2_000); // unknown player: logged, not fatal
        drop(writer);
        run_worker(rx, Arc::clone(&store)).await;

        assert_eq!(store.last_active(p), Some(1_000));
    }
}
