//! Inbound message throttling.
//!
//! The manager only needs the limiter to FORGET state when sockets and
//! players go away. The connection handler is the one that asks it
//! whether a command may pass.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mudlink_protocol::PlayerId;
use mudlink_transport::ConnectionId;

/// Per-socket message throttling.
///
/// Object-safe and synchronous; the manager holds an
/// `Arc<dyn RateLimiter>`.
pub trait RateLimiter: Send + Sync + 'static {
    /// Counts one inbound message and returns `false` if it is over the
    /// limit.
    fn check_message(&self, player_id: PlayerId, connection_id: &ConnectionId) -> bool;

    /// Forgets one socket's counters.
    fn remove_connection_message_data(&self, connection_id: &ConnectionId);

    /// Forgets every counter belonging to a player.
    fn remove_player_data(&self, player_id: &PlayerId);
}

struct Window {
    owner: PlayerId,
    started: Instant,
    count: u32,
}

/// Fixed-window counter per socket.
///
/// Each socket may send `max_messages` within `window`; the window
/// restarts at the first message after it expires.
pub struct WindowRateLimiter {
    max_messages: u32,
    window: Duration,
    windows: Mutex<HashMap<ConnectionId, Window>>,
}

impl WindowRateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sockets with live counters.
    pub fn tracked_connections(&self) -> usize {
        self.lock().map_or(0, |w| w.len())
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<ConnectionId, Window>>> {
        match self.windows.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("rate limiter state poisoned");
                None
            }
        }
    }

    fn check_at(&self, player_id: PlayerId, connection_id: &ConnectionId, now: Instant) -> bool {
        // A poisoned limiter admits everything.
        let Some(mut windows) = self.lock() else {
            return true;
        };
        let entry = windows
            .entry(connection_id.clone())
            .or_insert_with(|| Window {
                owner: player_id,
                started: now,
                count: 0,
            });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_messages
    }
}

impl Default for WindowRateLimiter {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check_message(&self, player_id: PlayerId, connection_id: &ConnectionId) -> bool {
        self.check_at(player_id, connection_id, Instant::now())
    }

    fn remove_connection_message_data(&self, connection_id: &ConnectionId) {
        if let Some(mut windows) = self.lock() {
            windows.remove(connection_id);
        }
    }

    fn remove_player_data(&self, player_id: &PlayerId) {
        if let Some(mut windows) = self.lock() {
            windows.retain(|_, w| w.owner != *player_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_message_over_limit_returns_false() {
        let limiter = WindowRateLimiter::new(2, Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let c = ConnectionId::new("c1");

        assert!(limiter.check_message(p, &c));
        assert!(limiter.check_message(p, &c));
        assert!(!limiter.check_message(p, &c));
    }

    #[test]
    fn test_check_message_window_expiry_resets_count() {
        let limiter = WindowRateLimiter::new(1, Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let c = ConnectionId::new("c1");
        let start = Instant::now();

        assert!(limiter.check_at(p, &c, start));
        assert!(!limiter.check_at(p, &c, start + Duration::from_secs(1)));
        assert!(limiter.check_at(p, &c, start + Duration::from_secs(61)));
    }

    #[test]
    fn test_limits_are_per_connection() {
        let limiter = WindowRateLimiter::new(1, Duration::from_secs(60));
        let p = PlayerId::new_v4();

        assert!(limiter.check_message(p, &ConnectionId::new("c1")));
        assert!(limiter.check_message(p, &ConnectionId::new("c2")));
    }

    #[test]
    fn test_remove_connection_message_data_forgets_counter() {
        let limiter = WindowRateLimiter::new(1, Duration::from_secs(60));
        let p = PlayerId::new_v4();
        let c = ConnectionId::new("c1");
        limiter.check_message(p, &c);

        limiter.remove_connection_message_data(&c);

        assert_eq!(limiter.tracked_connections(), 0);
        assert!(limiter.check_message(p, &c));
    }

    #[test]
    fn test_remove_player_data_only_touches_that_player() {
        let limiter = WindowRateLimiter::default();
        let p = PlayerId::new_v4();
        let q = PlayerId::new_v4();
        limiter.check_message(p, &ConnectionId::new("c1"));
        limiter.check_message(p, &ConnectionId::new("c2"));
        limiter.check_message(q, &ConnectionId::new("c3"));

        limiter.remove_player_data(&p);

        assert_eq!(limiter.tracked_connections(), 1);
    }
}
