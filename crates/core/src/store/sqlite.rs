//! SQLite-backed status store.
//!
//! Every process on a host opens the same database file, which gives the
//! deposit and job stores a shared source of truth without a server.
//! Each primitive is a single statement or a single `IMMEDIATE`
//! transaction, so it is atomic across processes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{now_millis, StatusStore, StoreError};

/// SQLite-backed status store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn map_err(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
            ) =>
        {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

impl SqliteStore {
    /// Open (or create) a store file shared with other processes.
    ///
    /// `busy_timeout` bounds how long a statement waits on another process's
    /// write lock before failing with [`StoreError::Unavailable`].
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_err)?;
        conn.busy_timeout(busy_timeout).map_err(map_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(map_err)?;
        debug!("Opened status store {} (journal_mode={})", path.display(), mode);
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_hash (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE TABLE IF NOT EXISTS kv_set (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );

            CREATE TABLE IF NOT EXISTS kv_list (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_expiry (
                key TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_list_key ON kv_list(key, id);
            CREATE INDEX IF NOT EXISTS idx_kv_expiry_expires_at ON kv_expiry(expires_at);
            "#,
        )
        .map_err(map_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))?;
        Self::purge_expired(&conn)?;
        Ok(conn)
    }

    /// Drop every key whose TTL has passed. Runs lazily before each operation.
    fn purge_expired(conn: &Connection) -> Result<(), StoreError> {
        let now = now_millis();
        let due: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM kv_expiry WHERE expires_at <= ?1)",
                params![now],
                |row| row.get(0),
            )
            .map_err(map_err)?;
        if !due {
            return Ok(());
        }

        for table in ["kv_hash", "kv_set", "kv_list"] {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE key IN (SELECT key FROM kv_expiry WHERE expires_at <= ?1)",
                    table
                ),
                params![now],
            )
            .map_err(map_err)?;
        }
        conn.execute("DELETE FROM kv_expiry WHERE expires_at <= ?1", params![now])
            .map_err(map_err)?;
        Ok(())
    }

    fn key_exists(conn: &Connection, key: &str) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?1)
                 OR EXISTS(SELECT 1 FROM kv_set WHERE key = ?1)
                 OR EXISTS(SELECT 1 FROM kv_list WHERE key = ?1)",
            params![key],
            |row| row.get(0),
        )
        .map_err(map_err)
    }

    /// A key that no longer holds anything must not keep a stale TTL around
    /// for whoever recreates it.
    fn forget_expiry_if_gone(conn: &Connection, key: &str) -> Result<(), StoreError> {
        if !Self::key_exists(conn, key)? {
            conn.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])
                .map_err(map_err)?;
        }
        Ok(())
    }

    fn collect_strings(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(map_err)?;

        let mut values = Vec::new();
        for row_result in rows {
            values.push(row_result.map_err(map_err)?);
        }
        Ok(values)
    }
}

impl StatusStore for SqliteStore {
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_err)
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT field, value FROM kv_hash WHERE key = ?1")
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_err)?;

        let mut fields = HashMap::new();
        for row_result in rows {
            let (field, value) = row_result.map_err(map_err)?;
            fields.insert(field, value);
        }
        Ok(fields)
    }

    fn hset_multiple(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;
        for (field, value) in fields {
            tx.execute(
                "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                params![key, field, value],
            )
            .map_err(map_err)?;
        }
        tx.commit().map_err(map_err)
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM kv_hash WHERE key = ?1 AND field = ?2",
                params![key, field],
            )
            .map_err(map_err)?;
        Self::forget_expiry_if_gone(&conn, key)?;
        Ok(removed > 0)
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )
            .map_err(map_err)?;
        Ok(inserted == 1)
    }

    fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_err)?;

        let current = match current {
            Some(v) => v.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                field: field.to_string(),
            })?,
            None => 0,
        };
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
                field: field.to_string(),
            })?;

        tx.execute(
            "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, updated.to_string()],
        )
        .map_err(map_err)?;
        tx.commit().map_err(map_err)?;

        Ok(updated)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO kv_set (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .map_err(map_err)?;
        Ok(inserted == 1)
    }

    fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM kv_set WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map_err(map_err)?;
        Self::forget_expiry_if_gone(&conn, key)?;
        Ok(removed > 0)
    }

    fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let members = Self::collect_strings(
            &conn,
            "SELECT member FROM kv_set WHERE key = ?1",
            params![key],
        )?;
        Ok(members.into_iter().collect())
    }

    fn sdiff(&self, key: &str, other: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let members = Self::collect_strings(
            &conn,
            "SELECT member FROM kv_set WHERE key = ?1
             AND member NOT IN (SELECT member FROM kv_set WHERE key = ?2)",
            params![key, other],
        )?;
        Ok(members.into_iter().collect())
    }

    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;
        tx.execute(
            "INSERT INTO kv_list (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(map_err)?;
        let len: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM kv_list WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(map_err)?;
        tx.commit().map_err(map_err)?;
        Ok(len as usize)
    }

    fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        Self::collect_strings(
            &conn,
            "SELECT value FROM kv_list WHERE key = ?1 ORDER BY id ASC",
            params![key],
        )
    }

    fn lrem(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM kv_list WHERE key = ?1 AND value = ?2",
                params![key, value],
            )
            .map_err(map_err)?;
        Self::forget_expiry_if_gone(&conn, key)?;
        Ok(removed)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Self::key_exists(&conn, key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        if !Self::key_exists(&conn, key)? {
            return Ok(false);
        }
        let expires_at = i64::try_from(ttl.as_millis())
            .ok()
            .and_then(|millis| now_millis().checked_add(millis));

        let written = match expires_at {
            Some(expires_at) => conn.execute(
                "INSERT INTO kv_expiry (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                params![key, expires_at],
            ),
            None => conn.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key]),
        };
        written.map_err(map_err)?;
        Ok(true)
    }

    fn del(&self, keys: &[&str]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;

        let mut removed = 0;
        for key in keys {
            if Self::key_exists(&tx, key)? {
                removed += 1;
            }
            for table in ["kv_hash", "kv_set", "kv_list", "kv_expiry"] {
                tx.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])
                    .map_err(map_err)?;
            }
        }
        tx.commit().map_err(map_err)?;
        Ok(removed)
    }
}
