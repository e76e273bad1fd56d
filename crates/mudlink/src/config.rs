//! Connection manager configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for the [`ConnectionManager`](crate::ConnectionManager) and the
/// WebSocket server.
///
/// `Default` gives production values. [`from_env`](Self::from_env)
/// overlays a few `MUDLINK_*` environment variables on top.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on a graceful socket close. A close that takes longer
    /// is abandoned and the socket is removed anyway.
    pub close_timeout: Duration,

    /// Minimum time between two "last active" writes for one player.
    pub last_active_interval: Duration,

    /// Capacity of the last-active write queue. Requests beyond it are
    /// dropped.
    pub last_active_queue: usize,

    /// Maximum queued messages per offline player. The oldest entry is
    /// dropped when a new one would exceed it.
    pub max_pending_messages: usize,

    /// How often the health monitor runs.
    pub health_check_interval: Duration,

    /// A player not seen for this long is pruned by the health monitor,
    /// and offline players' pending queues older than this are discarded
    /// by orphan cleanup.
    pub stale_player_after: Duration,

    /// A socket that sends nothing for this long is dropped.
    pub idle_timeout: Duration,

    /// Time allowed for the first (handshake) frame.
    pub handshake_timeout: Duration,

    /// Inbound commands allowed per socket per window.
    pub rate_limit_messages: u32,

    /// Length of the rate limiting window.
    pub rate_limit_window: Duration,

    /// Root directory for audit logs.
    pub audit_dir: PathBuf,

    /// Deployment environment name. Audit logs go under
    /// `<audit_dir>/<environment>/`.
    pub environment: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(2),
            last_active_interval: Duration::from_secs(60),
            last_active_queue: 256,
            max_pending_messages: 1000,
            health_check_interval: Duration::from_secs(30),
            stale_player_after: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            rate_limit_messages: 100,
            rate_limit_window: Duration::from_secs(60),
            audit_dir: PathBuf::from("logs"),
            environment: "development".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Defaults overlaid with environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `MUDLINK_ENV` | `environment` |
    /// | `MUDLINK_AUDIT_DIR` | `audit_dir` |
    /// | `MUDLINK_CLOSE_TIMEOUT_MS` | `close_timeout` |
    /// | `MUDLINK_LAST_ACTIVE_SECS` | `last_active_interval` |
    /// | `MUDLINK_MAX_PENDING` | `max_pending_messages` |
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(env) = lookup("MUDLINK_ENV").filter(|v| !v.is_empty()) {
            config.environment = env;
        }
        if let Some(dir) = lookup("MUDLINK_AUDIT_DIR").filter(|v| !v.is_empty()) {
            config.audit_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "MUDLINK_CLOSE_TIMEOUT_MS") {
            config.close_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "MUDLINK_LAST_ACTIVE_SECS") {
            config.last_active_interval = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "MUDLINK_MAX_PENDING") {
            config.max_pending_messages = max;
        }
        config
    }

    /// Path of the login audit log.
    pub fn login_audit_path(&self) -> PathBuf {
        self.audit_dir
            .join(&self.environment)
            .join("login_events.log")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}
