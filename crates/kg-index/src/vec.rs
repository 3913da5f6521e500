//! VEC index (§4.11): delegates entirely to the HNSW graph (§4.12).

use std::sync::Arc;

use kg_hnsw::{DistanceMetric, HnswIndex, ObjectStoreVectorStore, SqliteGraphStore};
use kg_model::EntityId;
use kg_object_store::ObjectStore;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// One row of the EntityId <-> NodeId mapping, as persisted both in the
/// `id_map` sqlite table and in an `IndexSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapRow {
    pub node_id: u64,
    pub entity_id: String,
}

/// Maps opaque HNSW `NodeId`s (u64) to knowledge-graph `EntityId`s and
/// back, since the vector graph is built over dense integer ids but the
/// rest of this crate addresses everything by entity id. Kept in an
/// in-process map for fast lookup, backed by an `id_map` table in the same
/// sqlite file as the HNSW graph so it survives a restart, and folded into
/// `IndexSnapshot` so it survives a full R2 restore onto an empty disk.
pub struct VecIndex<S: ObjectStore + ?Sized> {
    hnsw: HnswIndex<SqliteGraphStore, ObjectStoreVectorStore<S>>,
    id_map: std::sync::Mutex<IdMap>,
    id_map_conn: std::sync::Mutex<Connection>,
}

#[derive(Default)]
struct IdMap {
    forward: std::collections::HashMap<EntityId, u64>,
    backward: std::collections::HashMap<u64, EntityId>,
    next: u64,
}

impl IdMap {
    fn insert(&mut self, node_id: u64, entity_id: EntityId) {
        self.forward.insert(entity_id.clone(), node_id);
        self.backward.insert(node_id, entity_id);
        self.next = self.next.max(node_id + 1);
    }
}

fn create_id_map_table(conn: &Connection) -> Result<(), IndexError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS id_map (node_id INTEGER PRIMARY KEY, entity_id TEXT NOT NULL UNIQUE)",
        [],
    )?;
    Ok(())
}

fn load_id_map(conn: &Connection) -> Result<IdMap, IndexError> {
    let mut map = IdMap::default();
    let mut stmt = conn.prepare("SELECT node_id, entity_id FROM id_map")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (node_id, entity_id) = row?;
        map.insert(node_id as u64, EntityId::from_raw(entity_id));
    }
    Ok(map)
}

impl<S: ObjectStore + ?Sized> VecIndex<S> {
    pub fn open(conn: Connection, object_store: Arc<S>, prefix: impl Into<String>, metric: DistanceMetric) -> Result<Self, IndexError> {
        // SqliteGraphStore::open takes ownership of `conn`; grab a second
        // connection to the same database file (or a fresh in-memory one,
        // for an in-memory-backed index) to own the id_map table.
        let id_map_conn = match conn.path() {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        create_id_map_table(&id_map_conn)?;
        let id_map = load_id_map(&id_map_conn)?;

        let graph_store = Arc::new(SqliteGraphStore::open(conn).map_err(sql_err)?);
        let vector_store = Arc::new(ObjectStoreVectorStore::new(object_store, prefix));
        Ok(VecIndex {
            hnsw: HnswIndex::with_defaults(graph_store, vector_store, metric),
            id_map: std::sync::Mutex::new(id_map),
            id_map_conn: std::sync::Mutex::new(id_map_conn),
        })
    }

    pub async fn index_vector(&self, entity_id: &EntityId, vector: Vec<f32>) -> Result<(), IndexError> {
        let (node_id, is_new) = {
            let mut map = self.id_map.lock().unwrap();
            if let Some(&id) = map.forward.get(entity_id) {
                (id, false)
            } else {
                let id = map.next;
                map.next += 1;
                map.forward.insert(entity_id.clone(), id);
                map.backward.insert(id, entity_id.clone());
                (id, true)
            }
        };
        if is_new {
            self.id_map_conn.lock().unwrap().execute(
                "INSERT OR IGNORE INTO id_map (node_id, entity_id) VALUES (?1, ?2)",
                rusqlite::params![node_id as i64, entity_id.as_str()],
            )?;
        }
        self.hnsw.insert(node_id, vector).await.map_err(hnsw_err)
    }

    pub fn query_knn(&self, query: &[f32], k: usize, ef: usize) -> Vec<(EntityId, f32)> {
        let map = self.id_map.lock().unwrap();
        self.hnsw
            .search(query, k, ef)
            .into_iter()
            .filter_map(|(node_id, dist)| map.backward.get(&node_id).map(|id| (id.clone(), dist)))
            .collect()
    }

    /// Reloads the HNSW graph/vector data, then rebuilds the in-process
    /// `IdMap` from the persisted `id_map` table so a cold-started index
    /// still resolves `query_knn` results back to entity ids.
    pub async fn load_snapshot(&self) -> Result<(), IndexError> {
        self.hnsw.load_snapshot().await.map_err(hnsw_err)?;
        let rebuilt = load_id_map(&self.id_map_conn.lock().unwrap())?;
        *self.id_map.lock().unwrap() = rebuilt;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.hnsw.node_count()
    }

    /// All entity<->node mappings, for inclusion in an `IndexSnapshot`.
    pub fn export_id_map(&self) -> Result<Vec<IdMapRow>, IndexError> {
        let map = self.id_map.lock().unwrap();
        Ok(map.backward.iter().map(|(&node_id, entity_id)| IdMapRow { node_id, entity_id: entity_id.as_str().to_string() }).collect())
    }

    /// Restores entity<->node mappings recovered from an `IndexSnapshot`
    /// into both the persisted table and the in-process map.
    pub fn import_id_map(&self, rows: &[IdMapRow]) -> Result<(), IndexError> {
        let conn = self.id_map_conn.lock().unwrap();
        let mut map = self.id_map.lock().unwrap();
        for row in rows {
            conn.execute(
                "INSERT OR IGNORE INTO id_map (node_id, entity_id) VALUES (?1, ?2)",
                rusqlite::params![row.node_id as i64, row.entity_id],
            )?;
            map.insert(row.node_id, EntityId::from_raw(row.entity_id.clone()));
        }
        Ok(())
    }
}

fn sql_err(e: kg_hnsw::HnswError) -> IndexError {
    IndexError::Sql(e.to_string())
}

fn hnsw_err(e: kg_hnsw::HnswError) -> IndexError {
    IndexError::StorageWrite(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_object_store::InMemoryObjectStore;

    #[tokio::test]
    async fn knn_query_resolves_back_to_entity_ids() {
        let idx = VecIndex::open(
            Connection::open_in_memory().unwrap(),
            Arc::new(InMemoryObjectStore::new()),
            "ns",
            DistanceMetric::Euclidean,
        )
        .unwrap();
        let e1 = EntityId::from_raw("e1");
        let e2 = EntityId::from_raw("e2");
        idx.index_vector(&e1, vec![0.0, 0.0]).await.unwrap();
        idx.index_vector(&e2, vec![9.0, 9.0]).await.unwrap();
        let results = idx.query_knn(&[0.0, 0.0], 1, 20);
        assert_eq!(results[0].0, e1);
    }

    #[tokio::test]
    async fn id_map_survives_reopening_the_same_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vec.sqlite");
        let object_store = Arc::new(InMemoryObjectStore::new());
        let e1 = EntityId::from_raw("e1");

        {
            let idx = VecIndex::open(Connection::open(&db_path).unwrap(), object_store.clone(), "ns", DistanceMetric::Euclidean).unwrap();
            idx.index_vector(&e1, vec![0.0, 0.0]).await.unwrap();
        }

        let reopened = VecIndex::open(Connection::open(&db_path).unwrap(), object_store, "ns", DistanceMetric::Euclidean).unwrap();
        reopened.load_snapshot().await.unwrap();
        let results = reopened.query_knn(&[0.0, 0.0], 1, 20);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, e1);
    }

    #[test]
    fn import_id_map_restores_mappings_for_a_fresh_index() {
        let idx = VecIndex::open(
            Connection::open_in_memory().unwrap(),
            Arc::new(InMemoryObjectStore::new()),
            "ns",
            DistanceMetric::Euclidean,
        )
        .unwrap();
        idx.import_id_map(&[IdMapRow { node_id: 5, entity_id: "e5".to_string() }]).unwrap();
        let map = idx.id_map.lock().unwrap();
        assert_eq!(map.backward.get(&5), Some(&EntityId::from_raw("e5")));
        assert_eq!(map.next, 6);
    }
}
