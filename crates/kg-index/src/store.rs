//! `IndexStore` (§4.11, §9): the secondary index store facade composing
//! POS, OSP, FTS, GEO, and VEC behind one capability set. Hot path lives in
//! an embedded SQL engine; `save_to_r2`/`load_from_r2` persist a cold JSON
//! snapshot per namespace in the blob store.

use std::path::Path;
use std::sync::Arc;

use kg_hnsw::DistanceMetric;
use kg_model::{EntityId, GeoPoint, Triple, TypedObject};
use kg_object_store::ObjectStore;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::fts::{FtsDocRow, FtsIndex, FtsPostingRow};
use crate::geo::{GeoIndex, GeoRow};
use crate::osp::{OspIndex, OspRow};
use crate::pos::{PosIndex, PosRow};
use crate::vec::{IdMapRow, VecIndex};

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub pos_rows: u64,
    pub osp_rows: u64,
    pub fts_docs: u64,
    pub geo_points: u64,
    pub vec_nodes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    pos: Vec<PosRow>,
    osp: Vec<OspRow>,
    fts_docs: Vec<FtsDocRow>,
    fts_postings: Vec<FtsPostingRow>,
    geo: Vec<GeoRow>,
    #[serde(default)]
    id_map: Vec<IdMapRow>,
}

pub struct IndexStore<S: ObjectStore + ?Sized> {
    pos: PosIndex,
    osp: OspIndex,
    fts: FtsIndex,
    geo: GeoIndex,
    vec: VecIndex<S>,
    object_store: Arc<S>,
    snapshot_key_prefix: String,
}

fn snapshot_key(prefix: &str) -> String {
    format!("{prefix}/_index/snapshot.json")
}

impl<S: ObjectStore + ?Sized> IndexStore<S> {
    pub fn open(base_dir: &Path, object_store: Arc<S>, prefix: impl Into<String>, metric: DistanceMetric) -> Result<Self, IndexError> {
        let prefix = prefix.into();
        let pos = PosIndex::open(Connection::open(base_dir.join("pos.sqlite"))?)?;
        let osp = OspIndex::open(Connection::open(base_dir.join("osp.sqlite"))?)?;
        let fts = FtsIndex::open(Connection::open(base_dir.join("fts.sqlite"))?)?;
        let geo = GeoIndex::open(Connection::open(base_dir.join("geo.sqlite"))?)?;
        let vec = VecIndex::open(Connection::open(base_dir.join("vec.sqlite"))?, object_store.clone(), prefix.clone(), metric)?;
        Ok(IndexStore { pos, osp, fts, geo, vec, object_store, snapshot_key_prefix: prefix })
    }

    pub fn open_in_memory(object_store: Arc<S>, prefix: impl Into<String>, metric: DistanceMetric) -> Result<Self, IndexError> {
        let prefix = prefix.into();
        let pos = PosIndex::open_in_memory()?;
        let osp = OspIndex::open_in_memory()?;
        let fts = FtsIndex::open_in_memory()?;
        let geo = GeoIndex::open_in_memory()?;
        let vec = VecIndex::open(Connection::open_in_memory()?, object_store.clone(), prefix.clone(), metric)?;
        Ok(IndexStore { pos, osp, fts, geo, vec, object_store, snapshot_key_prefix: prefix })
    }

    /// Dispatches a triple to POS (scalar objects) or OSP (reference
    /// objects); does not touch FTS or GEO, which index derived text/points
    /// explicitly via [`Self::index_text`] / [`Self::index_geo`].
    pub fn index_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        self.pos.index_triple(triple)?;
        self.osp.index_triple(triple)?;
        Ok(())
    }

    pub fn unindex_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        self.pos.unindex_triple(triple)?;
        self.osp.unindex_triple(triple)?;
        Ok(())
    }

    pub fn index_text(&self, entity_id: &EntityId, text: &str) -> Result<(), IndexError> {
        self.fts.index_document(entity_id, text)
    }

    pub fn unindex_text(&self, entity_id: &EntityId) -> Result<(), IndexError> {
        self.fts.unindex_document(entity_id)
    }

    pub fn index_geo(&self, subject: &EntityId, predicate: &str, point: GeoPoint) -> Result<(), IndexError> {
        self.geo.index_point(subject, predicate, point)
    }

    pub fn unindex_geo(&self, subject: &EntityId, predicate: &str) -> Result<(), IndexError> {
        self.geo.unindex_point(subject, predicate)
    }

    pub async fn index_vector(&self, entity_id: &EntityId, vector: Vec<f32>) -> Result<(), IndexError> {
        self.vec.index_vector(entity_id, vector).await
    }

    pub fn get_by_predicate_value(&self, predicate: &str, object: &TypedObject) -> Result<Vec<EntityId>, IndexError> {
        self.pos.get_by_value(predicate, &object.pos_value_hash())
    }

    pub fn get_by_predicate_range(&self, predicate: &str, min: f64, max: f64) -> Result<Vec<EntityId>, IndexError> {
        self.pos.get_by_range(predicate, min, max)
    }

    pub fn get_by_predicate(&self, predicate: &str) -> Result<Vec<EntityId>, IndexError> {
        self.pos.get_by_predicate(predicate)
    }

    pub fn get_references_to(&self, object_ref: &str) -> Result<Vec<(EntityId, String)>, IndexError> {
        self.osp.get_references_to(object_ref)
    }

    pub fn get_references_to_via(&self, object_ref: &str, predicate: &str) -> Result<Vec<EntityId>, IndexError> {
        self.osp.get_references_to_via(object_ref, predicate)
    }

    pub fn search_text(&self, query: &str, limit: usize) -> Result<Vec<(EntityId, f64)>, IndexError> {
        self.fts.search(query, limit)
    }

    pub fn query_geo_bbox(&self, sw: GeoPoint, ne: GeoPoint, precision: usize) -> Result<Vec<EntityId>, IndexError> {
        self.geo.query_bbox(sw, ne, precision)
    }

    pub fn query_geo_radius(&self, center: GeoPoint, radius_meters: f64) -> Result<Vec<(EntityId, f64)>, IndexError> {
        self.geo.query_radius(center, radius_meters)
    }

    pub fn query_knn(&self, query: &[f32], k: usize, ef: usize) -> Vec<(EntityId, f32)> {
        self.vec.query_knn(query, k, ef)
    }

    pub fn get_stats(&self) -> Result<IndexStats, IndexError> {
        Ok(IndexStats {
            pos_rows: self.pos.row_count()?,
            osp_rows: self.osp.row_count()?,
            fts_docs: self.fts.doc_count()?,
            geo_points: self.geo.point_count()?,
            vec_nodes: self.vec.node_count() as u64,
        })
    }

    pub async fn save_to_r2(&self) -> Result<(), IndexError> {
        let (fts_docs, fts_postings) = self.fts.export_rows()?;
        let snapshot = IndexSnapshot {
            pos: self.pos.export_rows()?,
            osp: self.osp.export_rows()?,
            fts_docs,
            fts_postings,
            geo: self.geo.export_rows()?,
            id_map: self.vec.export_id_map()?,
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| IndexError::InvalidSnapshot(e.to_string()))?;
        let byte_len = bytes.len();
        self.object_store
            .put(&snapshot_key(&self.snapshot_key_prefix), bytes.into(), Some("application/json".to_string()))
            .await
            .map_err(|e| IndexError::StorageWrite(e.to_string()))?;
        tracing::debug!(
            prefix = %self.snapshot_key_prefix,
            pos_rows = snapshot.pos.len(),
            osp_rows = snapshot.osp.len(),
            fts_docs = snapshot.fts_docs.len(),
            geo_rows = snapshot.geo.len(),
            id_map_rows = snapshot.id_map.len(),
            byte_len,
            "wrote index snapshot to blob store"
        );
        Ok(())
    }

    pub async fn load_from_r2(&self) -> Result<bool, IndexError> {
        let fetched = self
            .object_store
            .get(&snapshot_key(&self.snapshot_key_prefix), None)
            .await
            .map_err(|e| IndexError::StorageRead(e.to_string()))?;
        let Some((_, bytes)) = fetched else { return Ok(false) };
        let snapshot: IndexSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| IndexError::InvalidSnapshot(e.to_string()))?;
        self.pos.import_rows(&snapshot.pos)?;
        self.osp.import_rows(&snapshot.osp)?;
        self.fts.import_rows(&snapshot.fts_docs, &snapshot.fts_postings)?;
        self.geo.import_rows(&snapshot.geo)?;
        self.vec.import_id_map(&snapshot.id_map)?;
        self.vec.load_snapshot().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_model::TxId;
    use kg_object_store::InMemoryObjectStore;

    fn store() -> IndexStore<InMemoryObjectStore> {
        IndexStore::open_in_memory(Arc::new(InMemoryObjectStore::new()), "ns", DistanceMetric::Euclidean).unwrap()
    }

    fn triple(subject: &str, predicate: &str, object: TypedObject) -> Triple {
        Triple { subject: subject.parse().unwrap(), predicate: predicate.parse().unwrap(), object, timestamp: 1, tx_id: TxId::from_parts(1, 0) }
    }

    #[test]
    fn index_triple_dispatches_scalar_to_pos_and_ref_to_osp() {
        let store = store();
        store.index_triple(&triple("s1", "name", TypedObject::String("Alice".into()))).unwrap();
        store.index_triple(&triple("s1", "knows", TypedObject::Ref("s2".parse().unwrap()))).unwrap();
        assert_eq!(store.get_by_predicate("name").unwrap().len(), 1);
        assert_eq!(store.get_references_to("s2").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn round_trips_through_an_r2_snapshot() {
        let backing = Arc::new(InMemoryObjectStore::new());
        let store = IndexStore::open_in_memory(backing.clone(), "ns", DistanceMetric::Euclidean).unwrap();
        store.index_triple(&triple("s1", "name", TypedObject::String("Alice".into()))).unwrap();
        store.index_geo(&EntityId::from_raw("s1"), "locatedAt", GeoPoint { lat: 1.0, lng: 2.0 }).unwrap();
        store.index_vector(&EntityId::from_raw("s1"), vec![0.0, 0.0]).await.unwrap();
        store.save_to_r2().await.unwrap();

        let restored = IndexStore::open_in_memory(backing, "ns", DistanceMetric::Euclidean).unwrap();
        let loaded = restored.load_from_r2().await.unwrap();
        assert!(loaded);
        assert_eq!(restored.get_stats().unwrap().pos_rows, 1);
        assert_eq!(restored.get_stats().unwrap().geo_points, 1);
        assert_eq!(restored.get_stats().unwrap().vec_nodes, 1);

        let results = restored.query_knn(&[0.0, 0.0], 1, 20);
        assert_eq!(results[0].0, EntityId::from_raw("s1"));
    }

    #[test]
    fn load_from_r2_returns_false_when_no_snapshot_exists() {
        let store = store();
        let result = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(store.load_from_r2())
            .unwrap();
        assert!(!result);
    }
}
