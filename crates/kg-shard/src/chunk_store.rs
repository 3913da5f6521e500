//! Chunk store (C10): the per-shard write path. Individual triples are
//! never persisted as primary rows — the `chunks` table stores only
//! GraphCol blobs, one row per ~10K-triple batch (§4.10).

use std::sync::Mutex;

use kg_graphcol::GraphColVersion;
use kg_model::{merge_current, Namespace, Triple};
use rusqlite::{params, Connection};

use crate::error::ShardError;

pub const MIN_CHUNKS_FOR_COMPACTION: usize = 4;
pub const MIN_CHUNK_SIZE_FOR_COMPACTION: u64 = 256 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ChunkStoreStats {
    pub chunk_count: u64,
    pub total_triples: u64,
    pub total_bytes: u64,
    pub buffered_triples: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub namespace: String,
    pub triple_count: u32,
    pub min_ts: u64,
    pub max_ts: u64,
    pub size_bytes: u64,
}

/// The per-shard chunk store. `conn` is a single synchronous SQLite
/// connection, consistent with the cooperative single-threaded shard
/// execution model (§5) — see `kg-durable-kv`'s `SqliteDurableKv` for the
/// same pattern.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    buffer: Mutex<Vec<Triple>>,
}

impl ChunkStore {
    pub fn open(conn: Connection) -> Result<Self, ShardError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                triple_count INTEGER NOT NULL,
                min_ts INTEGER NOT NULL,
                max_ts INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                data BLOB NOT NULL
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_chunks_namespace ON chunks(namespace)", [])?;
        Ok(ChunkStore { conn: Mutex::new(conn), buffer: Mutex::new(Vec::new()) })
    }

    pub fn open_in_memory() -> Result<Self, ShardError> {
        Self::open(Connection::open_in_memory()?)
    }

    /// Append to the in-memory buffer. No I/O.
    pub fn write(&self, triples: impl IntoIterator<Item = Triple>) {
        self.buffer.lock().unwrap().extend(triples);
    }

    /// Encode the buffer as one chunk and insert it as a single row; clears
    /// the buffer. A no-op returning `Ok(None)` when the buffer is empty.
    pub fn flush(&self, namespace: &Namespace) -> Result<Option<String>, ShardError> {
        let batch = std::mem::take(&mut *self.buffer.lock().unwrap());
        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.insert_chunk(namespace, &batch)?))
    }

    /// Like `flush`, but intended to be called unconditionally on
    /// hibernation/shutdown (§4.10); behaves identically to `flush`.
    pub fn force_flush(&self, namespace: &Namespace) -> Result<Option<String>, ShardError> {
        self.flush(namespace)
    }

    fn insert_chunk(&self, namespace: &Namespace, triples: &[Triple]) -> Result<String, ShardError> {
        let min_ts = triples.iter().map(|t| t.timestamp).min().unwrap_or(0);
        let max_ts = triples.iter().map(|t| t.timestamp).max().unwrap_or(0);
        let data = kg_graphcol::encode(triples, GraphColVersion::V2);
        let id = uuid::Uuid::new_v4().to_string();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chunks (id, namespace, triple_count, min_ts, max_ts, size_bytes, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                namespace.as_str(),
                triples.len() as u32,
                min_ts as i64,
                max_ts as i64,
                data.len() as i64,
                data
            ],
        )?;
        Ok(id)
    }

    /// Scan the buffer and candidate chunks (filtered by namespace and
    /// `[min_ts, max_ts]` overlap with the subject's possible range — here,
    /// all chunks in the namespace, since a subject's timestamp range isn't
    /// known ahead of decode) and merge by max-timestamp-wins; buffer wins
    /// exact ties against chunks (§4.10).
    pub fn query(&self, namespace: &Namespace, subject: &str) -> Result<Vec<Triple>, ShardError> {
        let buffered: Vec<Triple> = self
            .buffer
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.subject.as_str() == subject)
            .cloned()
            .collect();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM chunks WHERE namespace = ?1")?;
        let mut from_chunks: Vec<Triple> = Vec::new();
        let mut rows = stmt.query(params![namespace.as_str()])?;
        while let Some(row) = rows.next()? {
            let data: Vec<u8> = row.get(0)?;
            match kg_graphcol::decode(&data) {
                Ok(decoded) => from_chunks.extend(decoded.into_iter().filter(|t| t.subject.as_str() == subject)),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt chunk during query"),
            }
        }

        // Buffer entries are appended after chunk entries so `merge_current`'s
        // "first-seen wins exact ties" rule makes the buffer win ties, as
        // specified.
        let mut combined = from_chunks;
        combined.extend(buffered);
        Ok(merge_current(combined.iter()))
    }

    /// Merge `MIN_CHUNKS_FOR_COMPACTION` or more small chunks (each under
    /// `MIN_CHUNK_SIZE_FOR_COMPACTION`) in a namespace into one larger chunk,
    /// deleting the sources atomically. Returns the new chunk id, or `None`
    /// if there weren't enough small chunks to compact.
    pub fn compact(&self, namespace: &Namespace) -> Result<Option<String>, ShardError> {
        let candidates: Vec<(String, Vec<u8>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, data FROM chunks WHERE namespace = ?1 AND size_bytes < ?2",
            )?;
            let rows = stmt.query_map(params![namespace.as_str(), MIN_CHUNK_SIZE_FOR_COMPACTION as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if candidates.len() < MIN_CHUNKS_FOR_COMPACTION {
            return Ok(None);
        }

        let mut merged: Vec<Triple> = Vec::new();
        for (_, data) in &candidates {
            match kg_graphcol::decode(data) {
                Ok(decoded) => merged.extend(decoded),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt chunk during compaction"),
            }
        }

        let new_id = self.insert_chunk(namespace, &merged)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (id, _) in &candidates {
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        Ok(Some(new_id))
    }

    pub fn stats(&self, namespace: &Namespace) -> Result<ChunkStoreStats, ShardError> {
        let conn = self.conn.lock().unwrap();
        let (chunk_count, total_triples, total_bytes): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(triple_count), 0), COALESCE(SUM(size_bytes), 0)
             FROM chunks WHERE namespace = ?1",
            params![namespace.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(ChunkStoreStats {
            chunk_count: chunk_count as u64,
            total_triples: total_triples as u64,
            total_bytes: total_bytes as u64,
            buffered_triples: self.buffer.lock().unwrap().len(),
        })
    }

    pub fn list(&self, namespace: &Namespace) -> Result<Vec<ChunkRow>, ShardError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, namespace, triple_count, min_ts, max_ts, size_bytes FROM chunks WHERE namespace = ?1",
        )?;
        let rows = stmt.query_map(params![namespace.as_str()], |row| {
            Ok(ChunkRow {
                id: row.get(0)?,
                namespace: row.get(1)?,
                triple_count: row.get(2)?,
                min_ts: row.get::<_, i64>(3)? as u64,
                max_ts: row.get::<_, i64>(4)? as u64,
                size_bytes: row.get::<_, i64>(5)? as u64,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(ShardError::from)
    }

    pub fn delete(&self, chunk_id: &str) -> Result<bool, ShardError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM chunks WHERE id = ?1", params![chunk_id])?;
        Ok(changed > 0)
    }
}
