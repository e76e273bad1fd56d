//! Best-effort login audit log.
//!
//! One JSON object per line, appended to
//! `<audit_dir>/<environment>/login_events.log`. Nothing here can fail
//! the caller: directory creation and write errors are logged at debug
//! and swallowed.

use std::path::PathBuf;

use mudlink_protocol::PlayerId;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// One audited login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginAuditRecord {
    pub timestamp_ms: u64,
    pub player_id: PlayerId,
    pub event_type: &'static str,
    pub had_existing_connections: bool,
    pub existing_connection_count: usize,
}

impl LoginAuditRecord {
    pub fn new_login(player_id: PlayerId, existing_connection_count: usize, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            player_id,
            event_type: "new_login",
            had_existing_connections: existing_connection_count > 0,
            existing_connection_count,
        }
    }
}

/// Appends [`LoginAuditRecord`]s to a file.
#[derive(Debug, Clone)]
pub(crate) struct LoginAuditLog {
    path: PathBuf,
}

impl LoginAuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends one record. Returns `false` if it could not be written.
    pub async fn append(&self, record: &LoginAuditRecord) -> bool {
        match self.try_append(record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    path = %self.path.display(),
                    player_id = %record.player_id,
                    error = %e,
                    "login audit write failed"
                );
                false
            }
        }
    }

    async fn try_append(&self, record: &LoginAuditRecord) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("mudlink-audit-{}-{name}", std::process::id()))
            .join("test")
            .join("login_events.log")
    }

    #[tokio::test]
    async fn test_append_writes_one_json_line_per_record() {
        let path = temp_path("lines");
        let _ = tokio::fs::remove_file(&path).await;
        let log = LoginAuditLog::new(path.clone());
        let p = PlayerId::new_v4();

        assert!(log.append(&LoginAuditRecord::new_login(p, 2, 1_000)).await);
        assert!(log.append(&LoginAuditRecord::new_login(p, 0, 2_000)).await);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "new_login");
        assert_eq!(lines[0]["had_existing_connections"], true);
        assert_eq!(lines[0]["existing_connection_count"], 2);
        assert_eq!(lines[1]["had_existing_connections"], false);
        assert_eq!(lines[1]["player_id"], p.to_string());
    }

    #[tokio::test]
    async fn test_append_unwritable_path_returns_false() {
        // A regular file cannot be used as a directory.
        let blocker = std::env::temp_dir().join(format!("mudlink-audit-blocker-{}", std::process::id()));
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let log = LoginAuditLog::new(blocker.join("env").join("login_events.log"));

        let written = log
            .append(&LoginAuditRecord::new_login(PlayerId::new_v4(), 1, 0))
            .await;

        assert!(!written);
    }
}
