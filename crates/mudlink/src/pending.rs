//! Per-player queues of events that found no live socket.
//!
//! When a personal delivery reaches zero sockets, the optimized payload is
//! appended here. [`ConnectionManager::connect_websocket`] drains the queue
//! into the player's next socket.
//!
//! [`ConnectionManager::connect_websocket`]: crate::ConnectionManager::connect_websocket

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use mudlink_protocol::PlayerId;
use serde_json::Value;

struct PendingQueue {
    messages: VecDeque<Value>,
    last_enqueued: Instant,
}

/// Bounded FIFO queues keyed by player.
pub(crate) struct PendingQueues {
    queues: HashMap<PlayerId, PendingQueue>,
    max_per_player: usize,
}

impl PendingQueues {
    pub fn new(max_per_player: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_per_player: max_per_player.max(1),
        }
    }

    /// Appends a payload, dropping the oldest one if the queue is full.
    ///
    /// Returns `true` if something was dropped.
    pub fn push(&mut self, player_id: PlayerId, payload: Value) -> bool {
        let queue = self.queues.entry(player_id).or_insert_with(|| PendingQueue {
            messages: VecDeque::new(),
            last_enqueued: Instant::now(),
        });
        let mut dropped = false;
        if queue.messages.len() >= self.max_per_player {
            queue.messages.pop_front();
            dropped = true;
            tracing::warn!(
                %player_id,
                max = self.max_per_player,
                "pending queue full, dropped oldest message"
            );
        }
        queue.messages.push_back(payload);
        queue.last_enqueued = Instant::now();
        dropped
    }

    /// Removes and returns every queued payload, oldest first.
    pub fn take(&mut self, player_id: &PlayerId) -> Vec<Value> {
        self.queues
            .remove(player_id)
            .map(|q| q.messages.into())
            .unwrap_or_default()
    }

    /// Puts payloads back at the front, ahead of anything queued since.
    pub fn requeue_front(&mut self, player_id: PlayerId, payloads: Vec<Value>) {
        if payloads.is_empty() {
            return;
        }
        let queue = self.queues.entry(player_id).or_insert_with(|| PendingQueue {
            messages: VecDeque::new(),
            last_enqueued: Instant::now(),
        });
        for payload in payloads.into_iter().rev() {
            queue.messages.push_front(payload);
        }
        while queue.messages.len() > self.max_per_player {
            queue.messages.pop_back();
        }
    }

    pub fn clear(&mut self, player_id: &PlayerId) -> usize {
        self.queues
            .remove(player_id)
            .map_or(0, |q| q.messages.len())
    }

    pub fn len_for(&self, player_id: &PlayerId) -> usize {
        self.queues.get(player_id).map_or(0, |q| q.messages.len())
    }

    pub fn peek(&self, player_id: &PlayerId) -> Vec<Value> {
        self.queues
            .get(player_id)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total queued payloads across all players.
    pub fn total(&self) -> usize {
        self.queues.values().map(|q| q.messages.len()).sum()
    }

    pub fn player_count(&self) -> usize {
        self.queues.len()
    }

    /// Drops queues that were last written before `cutoff` and whose
    /// player `is_known` rejects. Returns the number of queues dropped.
    pub fn remove_expired<F>(&mut self, cutoff: Instant, is_known: F) -> usize
    where
        F: Fn(&PlayerId) -> bool,
    {
        let before = self.queues.len();
        self.queues
            .retain(|player_id, q| q.last_enqueued >= cutoff || is_known(player_id));
        before - self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_push_then_take_preserves_order() {
        let mut pending = PendingQueues::new(10);
        let p = PlayerId::new_v4();
        pending.push(p, json!(1));
        pending.push(p, json!(2));

        assert_eq!(pending.take(&p), vec![json!(1), json!(2)]);
        assert_eq!(pending.len_for(&p), 0);
        assert_eq!(pending.player_count(), 0);
    }

    #[test]
    fn test_push_over_capacity_drops_oldest() {
        let mut pending = PendingQueues::new(2);
        let p = PlayerId::new_v4();
        assert!(!pending.push(p, json!(1)));
        assert!(!pending.push(p, json!(2)));
        assert!(pending.push(p, json!(3)));

        assert_eq!(pending.peek(&p), vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_requeue_front_goes_before_newer_entries() {
        let mut pending = PendingQueues::new(10);
        let p = PlayerId::new_v4();
        pending.push(p, json!("new"));

        pending.requeue_front(p, vec![json!("a"), json!("b")]);

        assert_eq!(pending.take(&p), vec![json!("a"), json!("b"), json!("new")]);
    }

    #[test]
    fn test_remove_expired_keeps_known_players() {
        let mut pending = PendingQueues::new(10);
        let known = PlayerId::new_v4();
        let gone = PlayerId::new_v4();
        pending.push(known, json!(1));
        pending.push(gone, json!(1));

        let removed =
            pending.remove_expired(Instant::now() + Duration::from_secs(1), |p| *p == known);

        assert_eq!(removed, 1);
        assert_eq!(pending.len_for(&known), 1);
        assert_eq!(pending.len_for(&gone), 0);
    }

    #[test]
    fn test_total_counts_every_queue() {
        let mut pending = PendingQueues::new(10);
        pending.push(PlayerId::new_v4(), json!(1));
        pending.push(PlayerId::new_v4(), json!(1));
        pending.push(PlayerId::new_v4(), json!(1));
        assert_eq!(pending.total(), 3);
        assert_eq!(pending.player_count(), 3);
    }
}
