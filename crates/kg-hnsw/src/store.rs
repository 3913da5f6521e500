//! Pluggable persistence for the graph (nodes + connections) and the raw
//! vectors (§4.12). The graph store is synchronous, matching this
//! codebase's embedded-SQL convention; the vector store is async, matching
//! the blob-store contract it defaults to.

use std::sync::Mutex;

use bytes::Bytes;
use kg_object_store::ObjectStore;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::HnswError;
use crate::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub max_layer: usize,
    /// `connections[l]` is the adjacency list at layer `l`.
    pub connections: Vec<Vec<NodeId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphMeta {
    pub entry_point: Option<NodeId>,
    pub max_layer: usize,
    pub node_count: usize,
}

pub trait GraphStore: Send + Sync {
    fn save_node(&self, record: &NodeRecord) -> Result<(), HnswError>;
    fn load_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>, HnswError>;
    fn all_nodes(&self) -> Result<Vec<NodeRecord>, HnswError>;
    fn save_meta(&self, meta: &GraphMeta) -> Result<(), HnswError>;
    fn load_meta(&self) -> Result<Option<GraphMeta>, HnswError>;
}

/// Default graph backing: one row per node, blob per layer's connections.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn open(conn: Connection) -> Result<Self, HnswError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hnsw_nodes (
                node_id INTEGER PRIMARY KEY,
                max_layer INTEGER NOT NULL,
                connections TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hnsw_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                entry_point INTEGER,
                max_layer INTEGER NOT NULL,
                node_count INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(SqliteGraphStore { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, HnswError> {
        Self::open(Connection::open_in_memory()?)
    }
}

impl GraphStore for SqliteGraphStore {
    fn save_node(&self, record: &NodeRecord) -> Result<(), HnswError> {
        let connections = serde_json::to_string(&record.connections)
            .map_err(|e| HnswError::InvalidSnapshot(e.to_string()))?;
        self.conn.lock().unwrap().execute(
            "INSERT INTO hnsw_nodes (node_id, max_layer, connections) VALUES (?1, ?2, ?3)
             ON CONFLICT(node_id) DO UPDATE SET max_layer = excluded.max_layer, connections = excluded.connections",
            params![record.node_id as i64, record.max_layer as i64, connections],
        )?;
        Ok(())
    }

    fn load_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>, HnswError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT max_layer, connections FROM hnsw_nodes WHERE node_id = ?1",
                params![node_id as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        match row {
            None => Ok(None),
            Some((max_layer, connections)) => {
                let connections: Vec<Vec<NodeId>> = serde_json::from_str(&connections)
                    .map_err(|e| HnswError::InvalidSnapshot(e.to_string()))?;
                Ok(Some(NodeRecord { node_id, max_layer: max_layer as usize, connections }))
            }
        }
    }

    fn all_nodes(&self) -> Result<Vec<NodeRecord>, HnswError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT node_id, max_layer, connections FROM hnsw_nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (node_id, max_layer, connections) = row?;
            let connections: Vec<Vec<NodeId>> = serde_json::from_str(&connections)
                .map_err(|e| HnswError::InvalidSnapshot(e.to_string()))?;
            out.push(NodeRecord { node_id: node_id as NodeId, max_layer: max_layer as usize, connections });
        }
        Ok(out)
    }

    fn save_meta(&self, meta: &GraphMeta) -> Result<(), HnswError> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO hnsw_meta (id, entry_point, max_layer, node_count) VALUES (0, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET entry_point = excluded.entry_point, max_layer = excluded.max_layer, node_count = excluded.node_count",
            params![meta.entry_point.map(|e| e as i64), meta.max_layer as i64, meta.node_count as i64],
        )?;
        Ok(())
    }

    fn load_meta(&self) -> Result<Option<GraphMeta>, HnswError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(Option<i64>, i64, i64)> = conn
            .query_row(
                "SELECT entry_point, max_layer, node_count FROM hnsw_meta WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();
        Ok(row.map(|(entry_point, max_layer, node_count)| GraphMeta {
            entry_point: entry_point.map(|e| e as NodeId),
            max_layer: max_layer as usize,
            node_count: node_count as usize,
        }))
    }
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn put_vector(&self, node_id: NodeId, vector: &[f32]) -> Result<(), HnswError>;
    async fn get_vector(&self, node_id: NodeId) -> Result<Option<Vec<f32>>, HnswError>;
    async fn delete_vector(&self, node_id: NodeId) -> Result<(), HnswError>;
}

/// Default vector backing: one object per node, raw little-endian f32
/// payload, namespaced under a predicate-scoped key prefix so multiple
/// vector indexes can share one blob store without colliding.
pub struct ObjectStoreVectorStore<S: ObjectStore + ?Sized> {
    store: std::sync::Arc<S>,
    prefix: String,
}

impl<S: ObjectStore + ?Sized> ObjectStoreVectorStore<S> {
    pub fn new(store: std::sync::Arc<S>, prefix: impl Into<String>) -> Self {
        ObjectStoreVectorStore { store, prefix: prefix.into() }
    }

    fn key(&self, node_id: NodeId) -> String {
        format!("{}/_vectors/{}.f32", self.prefix, node_id)
    }
}

fn encode_f32(vector: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[async_trait::async_trait]
impl<S: ObjectStore + ?Sized> VectorStore for ObjectStoreVectorStore<S> {
    async fn put_vector(&self, node_id: NodeId, vector: &[f32]) -> Result<(), HnswError> {
        self.store.put(&self.key(node_id), encode_f32(vector), Some("application/octet-stream".to_string())).await?;
        Ok(())
    }

    async fn get_vector(&self, node_id: NodeId) -> Result<Option<Vec<f32>>, HnswError> {
        match self.store.get(&self.key(node_id), None).await? {
            Some((_, bytes)) => Ok(Some(decode_f32(&bytes))),
            None => Ok(None),
        }
    }

    async fn delete_vector(&self, node_id: NodeId) -> Result<(), HnswError> {
        self.store.delete(&self.key(node_id)).await?;
        Ok(())
    }
}
