//! Durable key/value + list + sorted-set substrate.
//!
//! Backed by SQLite (the teacher's `Db` wraps the same `Mutex<Connection>`
//! pattern). SQLite has no native blocking-pop, so the notify-list's
//! blocking wait is implemented with a per-key `tokio::sync::Notify` —
//! the "channel-per-agent pattern" the design notes call out as the
//! sanctioned fallback when the store itself can't block.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::errors::CoordinatorError;

pub struct Store {
    conn: Mutex<Connection>,
    wakers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Store {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).expect("failed to open store database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set store pragmas");
        let store = Store {
            conn: Mutex::new(conn),
            wakers: Mutex::new(HashMap::new()),
        };
        store.migrate();
        store
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_hashes (
                hash_name TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (hash_name, field)
            );

            CREATE TABLE IF NOT EXISTS list_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_name TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_list_entries_name ON list_entries(list_name, id);

            CREATE TABLE IF NOT EXISTS list_ttl (
                list_name TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_zsets (
                zset_name TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (zset_name, member)
            );
            CREATE INDEX IF NOT EXISTS idx_kv_zsets_score ON kv_zsets(zset_name, score);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                resource TEXT NOT NULL,
                outcome TEXT NOT NULL,
                detail TEXT NOT NULL
            );",
        )
        .expect("failed to run store migrations");
    }

    fn waker(&self, list_name: &str) -> Arc<Notify> {
        let mut wakers = self.wakers.lock().unwrap();
        wakers
            .entry(list_name.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    // --- Hash primitives (agents, api_keys, key_ids) ---

    pub fn hash_set(&self, hash: &str, field: &str, value: &serde_json::Value) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_hashes (hash_name, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(hash_name, field) DO UPDATE SET value = excluded.value",
            params![hash, field, value.to_string()],
        )?;
        Ok(())
    }

    pub fn hash_get(&self, hash: &str, field: &str) -> Result<Option<serde_json::Value>, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_hashes WHERE hash_name = ?1 AND field = ?2",
                params![hash, field],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub fn hash_del(&self, hash: &str, field: &str) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM kv_hashes WHERE hash_name = ?1 AND field = ?2",
            params![hash, field],
        )?;
        Ok(())
    }

    pub fn hash_all(&self, hash: &str) -> Result<Vec<(String, serde_json::Value)>, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT field, value FROM kv_hashes WHERE hash_name = ?1")?;
        let rows = stmt
            .query_map(params![hash], |r| {
                let field: String = r.get(0)?;
                let value: String = r.get(1)?;
                Ok((field, value))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(f, v)| serde_json::from_str(&v).ok().map(|v| (f, v)))
            .collect();
        Ok(rows)
    }

    // --- List primitives (inbox, notify) ---

    /// Append a value to a list and refresh its TTL. Wakes any blocked waiters on this list.
    pub fn list_push(&self, list: &str, value: &serde_json::Value, ttl: Duration) -> Result<(), CoordinatorError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO list_entries (list_name, value, created_at) VALUES (?1, ?2, ?3)",
                params![list, value.to_string(), now.to_rfc3339()],
            )?;
            conn.execute(
                "INSERT INTO list_ttl (list_name, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(list_name) DO UPDATE SET expires_at = excluded.expires_at",
                params![list, expires_at.to_rfc3339()],
            )?;
        }
        self.waker(list).notify_waiters();
        Ok(())
    }

    /// Non-destructive oldest-first snapshot of a list.
    pub fn list_range(&self, list: &str) -> Result<Vec<serde_json::Value>, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT value FROM list_entries WHERE list_name = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![list], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();
        Ok(rows)
    }

    pub fn list_len(&self, list: &str) -> Result<usize, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM list_entries WHERE list_name = ?1",
            params![list],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Remove every entry for which `pred` returns true. Returns the number removed.
    /// Absent matches are a no-op — this is what makes ack idempotent.
    pub fn list_remove_matching<F>(&self, list: &str, pred: F) -> Result<usize, CoordinatorError>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, value FROM list_entries WHERE list_name = ?1")?;
        let to_delete: Vec<i64> = stmt
            .query_map(params![list], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .filter_map(|(id, v)| {
                serde_json::from_str::<serde_json::Value>(&v)
                    .ok()
                    .filter(|parsed| pred(parsed))
                    .map(|_| id)
            })
            .collect();
        drop(stmt);
        for id in &to_delete {
            conn.execute("DELETE FROM list_entries WHERE id = ?1", params![id])?;
        }
        Ok(to_delete.len())
    }

    /// Delete a list and its TTL entry entirely (used when an empty inbox is torn down).
    pub fn list_delete(&self, list: &str) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM list_entries WHERE list_name = ?1", params![list])?;
        conn.execute("DELETE FROM list_ttl WHERE list_name = ?1", params![list])?;
        Ok(())
    }

    /// Pop the oldest entry off a list, if any. Used to consume a single notify token.
    fn try_pop_front(&self, list: &str) -> Result<bool, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM list_entries WHERE list_name = ?1 ORDER BY id ASC LIMIT 1",
                params![list],
                |r| r.get(0),
            )
            .optional()?;
        match id {
            Some(id) => {
                conn.execute("DELETE FROM list_entries WHERE id = ?1", params![id])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Push a zero-length notify token and wake any blocked waiter.
    pub fn notify_push(&self, list: &str) -> Result<(), CoordinatorError> {
        self.list_push(list, &serde_json::Value::Null, Duration::from_secs(24 * 3600))
    }

    /// Try to consume one notify token without blocking. Returns true if one was present.
    pub fn try_consume_notify(&self, list: &str) -> Result<bool, CoordinatorError> {
        self.try_pop_front(list)
    }

    /// Block until a notify token appears (consuming it) or the timeout elapses.
    /// Returns true if a token was consumed, false on timeout.
    pub async fn blocking_consume_notify(&self, list: &str, timeout: Duration) -> Result<bool, CoordinatorError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register as a waiter before popping: a `notify_push` landing
            // between the pop and registration would otherwise call
            // `notify_waiters()` with nobody listening and the wake is lost
            // until the full timeout elapses. `enable()` registers the
            // future immediately, without needing to poll/await it first.
            let waker = self.waker(list);
            let notified = waker.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_pop_front(list)? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    // --- Sorted-set primitives (rate limit windows) ---

    pub fn zset_prune(&self, zset: &str, min_score: f64) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM kv_zsets WHERE zset_name = ?1 AND score < ?2",
            params![zset, min_score],
        )?;
        Ok(())
    }

    pub fn zset_count(&self, zset: &str) -> Result<usize, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_zsets WHERE zset_name = ?1",
            params![zset],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn zset_add(&self, zset: &str, member: &str, score: f64) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_zsets (zset_name, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(zset_name, member) DO UPDATE SET score = excluded.score",
            params![zset, member, score],
        )?;
        Ok(())
    }

    // --- Audit ring ---

    pub fn audit_append(&self, entry_json: &serde_json::Value, cap: usize) -> Result<(), CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (timestamp, actor, action, resource, outcome, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry_json["timestamp"].as_str().unwrap_or_default(),
                entry_json["actor"].as_str().unwrap_or_default(),
                entry_json["action"].as_str().unwrap_or_default(),
                entry_json["resource"].as_str().unwrap_or_default(),
                entry_json["outcome"].as_str().unwrap_or_default(),
                entry_json["detail"].to_string(),
            ],
        )?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?;
        if total as usize > cap {
            let excess = total as usize - cap;
            conn.execute(
                "DELETE FROM audit_log WHERE id IN (SELECT id FROM audit_log ORDER BY id ASC LIMIT ?1)",
                params![excess as i64],
            )?;
        }
        Ok(())
    }

    pub fn audit_list(&self, limit: usize) -> Result<Vec<serde_json::Value>, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, actor, action, resource, outcome, detail FROM audit_log
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                let detail_raw: String = r.get(5)?;
                Ok(serde_json::json!({
                    "timestamp": r.get::<_, String>(0)?,
                    "actor": r.get::<_, String>(1)?,
                    "action": r.get::<_, String>(2)?,
                    "resource": r.get::<_, String>(3)?,
                    "outcome": r.get::<_, String>(4)?,
                    "detail": serde_json::from_str::<serde_json::Value>(&detail_raw).unwrap_or(serde_json::Value::Null),
                }))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // --- Scavenger support ---

    /// Delete list entries (and orphaned TTL rows) whose list-level TTL has expired.
    pub fn prune_expired_lists(&self, now: chrono::DateTime<Utc>) -> Result<usize, CoordinatorError> {
        let conn = self.conn.lock().unwrap();
        let expired: Vec<String> = {
            let mut stmt = conn.prepare("SELECT list_name FROM list_ttl WHERE expires_at < ?1")?;
            stmt.query_map(params![now.to_rfc3339()], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        let mut pruned = 0usize;
        for list in &expired {
            pruned += conn.execute("DELETE FROM list_entries WHERE list_name = ?1", params![list])? as usize;
            conn.execute("DELETE FROM list_ttl WHERE list_name = ?1", params![list])?;
        }
        Ok(pruned)
    }
}
