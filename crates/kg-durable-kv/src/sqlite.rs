//! `rusqlite`-backed `DurableKv`, sharing the same embedded-SQL connection
//! type a shard uses for chunk and index storage (SPEC_FULL §A). Calls are
//! synchronous `rusqlite` operations run directly on the calling task, the
//! way this codebase's `derive-sqlite` crate drives `rusqlite::Connection`
//! without an offload thread — appropriate here because a shard is a single
//! cooperative execution context (§5), not a shared connection pool.

use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::DurableKvError;
use crate::store::DurableKv;

pub struct SqliteDurableKv {
    conn: Mutex<Connection>,
}

impl SqliteDurableKv {
    pub fn open(conn: Connection) -> Result<Self, DurableKvError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )
        .map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        Ok(SqliteDurableKv { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, DurableKvError> {
        let conn = Connection::open_in_memory().map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        Self::open(conn)
    }
}

#[async_trait::async_trait]
impl DurableKv for SqliteDurableKv {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, DurableKvError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(DurableKvError::StorageRead(other.to_string())),
            })
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), DurableKvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DurableKvError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        Ok(affected > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, DurableKvError> {
        let conn = self.conn.lock().unwrap();
        let mut deleted = 0;
        for key in keys {
            deleted += conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        }
        Ok(deleted)
    }

    async fn list_raw(&self, prefix: Option<&str>) -> Result<Vec<(String, Vec<u8>)>, DurableKvError> {
        let conn = self.conn.lock().unwrap();
        let like_pattern = prefix.map(|p| format!("{}%", p.replace('%', "\\%")));
        let mut stmt = if like_pattern.is_some() {
            conn.prepare("SELECT key, value FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")
        } else {
            conn.prepare("SELECT key, value FROM kv ORDER BY key")
        }
        .map_err(|e| DurableKvError::StorageRead(e.to_string()))?;

        let rows = if let Some(pattern) = like_pattern {
            stmt.query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))
        } else {
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        }
        .map_err(|e| DurableKvError::StorageRead(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DurableKvError::StorageRead(e.to_string()))
    }

    async fn put_many_raw(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), DurableKvError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| DurableKvError::StorageWrite(e.to_string()))?;
        }
        tx.commit().map_err(|e| DurableKvError::StorageWrite(e.to_string()))
    }
}
