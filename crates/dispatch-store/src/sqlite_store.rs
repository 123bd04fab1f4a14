// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{AuditEntry, AuditOutcome, SessionState, Store};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS active_sessions (
    sender     TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cursors (
    sender TEXT PRIMARY KEY,
    ts     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS processed_events (
    event_id TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS recent_messages (
    sender    TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    seen_at   TEXT NOT NULL,
    PRIMARY KEY (sender, text_hash)
);
CREATE TABLE IF NOT EXISTS audit_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    action_name  TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    outcome      TEXT NOT NULL,
    duration_ms  INTEGER NOT NULL,
    recorded_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id   TEXT NOT NULL,
    blob        TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_thread ON history(thread_id, id);
"#;

/// Default cap for the audit ring (spec §3 AuditEntry: "ring-buffered,
/// bounded; oldest evicted").
const DEFAULT_AUDIT_CAP: usize = 1000;

/// Embedded, file-backed implementation of [`Store`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    audit_cap: usize,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path`. The parent
    /// directory is created with mode 0700 on unix if missing.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), audit_cap: DEFAULT_AUDIT_CAP })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), audit_cap: DEFAULT_AUDIT_CAP })
    }

    /// Overrides the audit ring's cap (default [`DEFAULT_AUDIT_CAP`]).
    pub fn with_audit_cap(mut self, cap: usize) -> Self {
        self.audit_cap = cap;
        self
    }

    async fn with_conn<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("store task panicked: {e}"))?
        .map_err(anyhow::Error::from)
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_active(&self, sender: &str, session_id: &str) -> anyhow::Result<()> {
        let sender = sender.to_string();
        let session_id = session_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO active_sessions (sender, session_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(sender) DO UPDATE SET session_id = excluded.session_id, updated_at = excluded.updated_at",
                params![sender, session_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_active(&self, sender: &str) -> anyhow::Result<()> {
        let sender = sender.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM active_sessions WHERE sender = ?1", params![sender])?;
            Ok(())
        })
        .await
    }

    async fn active(&self, sender: &str) -> anyhow::Result<Option<SessionState>> {
        let sender = sender.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT session_id, updated_at FROM active_sessions WHERE sender = ?1",
                params![sender],
                |row| {
                    let session_id: String = row.get(0)?;
                    let updated_at: String = row.get(1)?;
                    Ok((session_id, updated_at))
                },
            )
            .optional()
        })
        .await
        .map(|row| {
            row.and_then(|(session_id, updated_at)| {
                if session_id.is_empty() {
                    return None;
                }
                let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Some(SessionState { session_id, updated_at })
            })
        })
    }

    async fn last_cursor(&self, sender: &str) -> anyhow::Result<DateTime<Utc>> {
        let sender = sender.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row("SELECT ts FROM cursors WHERE sender = ?1", params![sender], |row| {
                    row.get(0)
                })
                .optional()
            })
            .await?;
        Ok(match raw {
            Some(ts) => DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH),
            None => DateTime::<Utc>::UNIX_EPOCH,
        })
    }

    async fn save_cursor(&self, sender: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
        let sender = sender.to_string();
        let ts = ts.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cursors (sender, ts) VALUES (?1, ?2)
                 ON CONFLICT(sender) DO UPDATE SET ts = excluded.ts",
                params![sender, ts],
            )?;
            Ok(())
        })
        .await
    }

    async fn already_processed(&self, event_id: &str) -> anyhow::Result<bool> {
        if event_id.is_empty() {
            return Err(dispatch_core::DispatcherError::InvalidInput("event_id must not be empty".into()).into());
        }
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO processed_events (event_id) VALUES (?1)",
                params![event_id],
            )?;
            Ok(changed == 0)
        })
        .await
    }

    async fn recent_message_seen(
        &self,
        sender: &str,
        text: &str,
        window: chrono::Duration,
    ) -> anyhow::Result<bool> {
        let window = if window <= chrono::Duration::zero() {
            chrono::Duration::seconds(30)
        } else {
            window
        };
        let sender = sender.to_string();
        let hash = hash_text(text);
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        self.with_conn(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT seen_at FROM recent_messages WHERE sender = ?1 AND text_hash = ?2",
                    params![sender, hash],
                    |row| row.get(0),
                )
                .optional()?;

            conn.execute(
                "INSERT INTO recent_messages (sender, text_hash, seen_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(sender, text_hash) DO UPDATE SET seen_at = excluded.seen_at",
                params![sender, hash, now_str],
            )?;

            let was_recent = match existing {
                Some(seen_at) => DateTime::parse_from_rfc3339(&seen_at)
                    .map(|dt| now - dt.with_timezone(&Utc) < window)
                    .unwrap_or(false),
                None => false,
            };
            Ok(was_recent)
        })
        .await
    }

    async fn append_audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
        let outcome = match entry.outcome {
            AuditOutcome::Ok => "ok",
            AuditOutcome::Error => "error",
            AuditOutcome::Denied => "denied",
        };
        let now = Utc::now().to_rfc3339();
        let cap = self.audit_cap;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (action_name, sender_id, outcome, duration_ms, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.action_name, entry.sender_id, outcome, entry.duration_ms as i64, now],
            )?;
            if cap > 0 {
                conn.execute(
                    "DELETE FROM audit_log WHERE id NOT IN (
                        SELECT id FROM audit_log ORDER BY id DESC LIMIT ?1
                    )",
                    params![cap as i64],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn audit(&self, limit: usize) -> anyhow::Result<Vec<AuditEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT action_name, sender_id, outcome, duration_ms FROM audit_log
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    let outcome_str: String = row.get(2)?;
                    let outcome = match outcome_str.as_str() {
                        "ok" => AuditOutcome::Ok,
                        "denied" => AuditOutcome::Denied,
                        _ => AuditOutcome::Error,
                    };
                    Ok(AuditEntry {
                        action_name: row.get(0)?,
                        sender_id: row.get(1)?,
                        outcome,
                        duration_ms: row.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().rev().collect())
        })
        .await
    }

    async fn append_history(&self, thread_id: &str, blob: &str, cap: usize) -> anyhow::Result<()> {
        let thread_id = thread_id.to_string();
        let blob = blob.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO history (thread_id, blob, recorded_at) VALUES (?1, ?2, ?3)",
                params![thread_id, blob, now],
            )?;
            if cap > 0 {
                conn.execute(
                    "DELETE FROM history WHERE thread_id = ?1 AND id NOT IN (
                        SELECT id FROM history WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2
                    )",
                    params![thread_id, cap as i64],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn history(&self, thread_id: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT blob FROM history WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![thread_id, limit as i64], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().rev().collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::Store as _;

    #[tokio::test]
    async fn active_absent_by_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.active("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_read_active() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_active("alice", "s1").await.unwrap();
        let state = store.active("alice").await.unwrap().unwrap();
        assert_eq!(state.session_id, "s1");
    }

    #[tokio::test]
    async fn clear_active_removes_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_active("alice", "s1").await.unwrap();
        store.clear_active("alice").await.unwrap();
        assert!(store.active("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn already_processed_is_test_and_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.already_processed("evt-1").await.unwrap());
        assert!(store.already_processed("evt-1").await.unwrap());
    }

    #[tokio::test]
    async fn already_processed_rejects_empty_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.already_processed("").await.is_err());
    }

    #[tokio::test]
    async fn recent_message_seen_within_window() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store
            .recent_message_seen("alice", "hello", chrono::Duration::seconds(30))
            .await
            .unwrap());
        assert!(store
            .recent_message_seen("alice", "hello", chrono::Duration::seconds(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn recent_message_seen_distinguishes_text() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .recent_message_seen("alice", "hello", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(!store
            .recent_message_seen("alice", "goodbye", chrono::Duration::seconds(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn audit_roundtrip_in_chronological_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_audit(AuditEntry { action_name: "shell".into(), sender_id: "alice".into(), outcome: AuditOutcome::Ok, duration_ms: 5 })
            .await
            .unwrap();
        store
            .append_audit(AuditEntry { action_name: "read_file".into(), sender_id: "alice".into(), outcome: AuditOutcome::Denied, duration_ms: 0 })
            .await
            .unwrap();
        let entries = store.audit(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_name, "shell");
        assert_eq!(entries[1].outcome, AuditOutcome::Denied);
    }

    #[tokio::test]
    async fn audit_ring_evicts_oldest_past_cap() {
        let store = SqliteStore::open_in_memory().unwrap().with_audit_cap(3);
        for i in 0..5 {
            store
                .append_audit(AuditEntry {
                    action_name: format!("action-{i}"),
                    sender_id: "alice".into(),
                    outcome: AuditOutcome::Ok,
                    duration_ms: 0,
                })
                .await
                .unwrap();
        }
        let entries = store.audit(10).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.action_name.as_str()).collect();
        assert_eq!(names, vec!["action-2", "action-3", "action-4"]);
    }

    #[tokio::test]
    async fn history_respects_cap() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.append_history("t1", &format!("line {i}"), 3).await.unwrap();
        }
        let lines = store.history("t1", 10).await.unwrap();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn cursor_defaults_to_epoch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ts = store.last_cursor("alice").await.unwrap();
        assert_eq!(ts, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let store = SqliteStore::open(&path).unwrap();
        store.save_active("alice", "s1").await.unwrap();
        assert!(path.exists());
    }
}
