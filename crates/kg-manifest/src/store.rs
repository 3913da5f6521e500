//! Shard-local manifest store (C7): per-file manifest rows and entity index
//! entries cached in a durable KV, with an in-memory LRU over namespaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kg_durable_kv::{DurableKv, DurableKvExt};
use kg_model::{namespace_of, path_transform, EntityId};
use kg_object_store::ObjectStore;

use crate::error::ManifestError;
use crate::types::{EntityIndexEntry, ManifestRow, R2Manifest};

#[derive(Debug, Clone)]
pub struct ManifestStoreConfig {
    pub max_cached_namespaces: usize,
    pub max_entities_per_namespace: usize,
}

impl Default for ManifestStoreConfig {
    fn default() -> Self {
        ManifestStoreConfig {
            max_cached_namespaces: 10,
            max_entities_per_namespace: 100_000,
        }
    }
}

#[derive(Default)]
struct Cache {
    /// Most-recently-used namespace at the back.
    order: Vec<String>,
    entries: HashMap<String, HashMap<String, EntityIndexEntry>>,
    manifests: HashMap<String, Arc<R2Manifest>>,
}

pub struct ManifestStore<K: DurableKv + ?Sized> {
    kv: std::sync::Arc<K>,
    config: ManifestStoreConfig,
    cache: Mutex<Cache>,
}

fn manifest_key(namespace: &str, path: &str) -> String {
    format!("manifest:{namespace}:{path}")
}

fn entity_key(entity_id: &str) -> String {
    format!("entity:{entity_id}")
}

fn roster_key(namespace: &str) -> String {
    format!("entityIndex:{namespace}")
}

impl<K: DurableKv + ?Sized> ManifestStore<K> {
    pub fn new(kv: std::sync::Arc<K>, config: ManifestStoreConfig) -> Self {
        ManifestStore {
            kv,
            config,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub async fn get(&self, namespace: &str, path: &str) -> Result<Option<ManifestRow>, ManifestError> {
        self.kv
            .get(&manifest_key(namespace, path))
            .await
            .map_err(|e| ManifestError::StorageRead(e.to_string()))
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<ManifestRow>, ManifestError> {
        let rows: Vec<(String, ManifestRow)> = self
            .kv
            .list(Some(&format!("manifest:{namespace}:")))
            .await
            .map_err(|e| ManifestError::StorageRead(e.to_string()))?;
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    pub async fn put(&self, row: ManifestRow) -> Result<(), ManifestError> {
        self.kv
            .put(&manifest_key(&row.namespace, &row.path), &row)
            .await
            .map_err(|e| ManifestError::StorageWrite(e.to_string()))
    }

    pub async fn delete(&self, namespace: &str, path: &str) -> Result<(), ManifestError> {
        self.kv
            .delete(&manifest_key(namespace, path))
            .await
            .map(|_| ())
            .map_err(|e| ManifestError::StorageWrite(e.to_string()))
    }

    /// Load (and cache) every entity index entry for a namespace.
    pub async fn load_entity_index(
        &self,
        namespace: &str,
    ) -> Result<HashMap<String, EntityIndexEntry>, ManifestError> {
        if let Some(cached) = self.touch_cached(namespace) {
            return Ok(cached);
        }

        let roster: Vec<String> = self
            .kv
            .get(&roster_key(namespace))
            .await
            .map_err(|e| ManifestError::StorageRead(e.to_string()))?
            .unwrap_or_default();

        let mut entries = HashMap::with_capacity(roster.len());
        for entity_id in roster.into_iter().take(self.config.max_entities_per_namespace) {
            if let Some(entry) = self
                .kv
                .get::<EntityIndexEntry>(&entity_key(&entity_id))
                .await
                .map_err(|e| ManifestError::StorageRead(e.to_string()))?
            {
                entries.insert(entity_id, entry);
            }
        }

        self.insert_cached(namespace, entries.clone());
        Ok(entries)
    }

    /// Batched write of every entry plus the namespace roster.
    pub async fn put_entity_index(
        &self,
        namespace: &str,
        entries: Vec<EntityIndexEntry>,
    ) -> Result<(), ManifestError> {
        let truncated: Vec<EntityIndexEntry> =
            entries.into_iter().take(self.config.max_entities_per_namespace).collect();

        let roster: Vec<String> = truncated.iter().map(|e| e.entity_id.clone()).collect();
        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(truncated.len() + 1);
        for entry in &truncated {
            let bytes = serde_json::to_vec(entry).map_err(|e| ManifestError::InvalidData(e.to_string()))?;
            batch.push((entity_key(&entry.entity_id), bytes));
        }
        let roster_bytes = serde_json::to_vec(&roster).map_err(|e| ManifestError::InvalidData(e.to_string()))?;
        batch.push((roster_key(namespace), roster_bytes));

        self.kv
            .put_many_raw(batch)
            .await
            .map_err(|e| ManifestError::StorageWrite(e.to_string()))?;

        let map: HashMap<String, EntityIndexEntry> =
            truncated.into_iter().map(|e| (e.entity_id.clone(), e)).collect();
        self.insert_cached(namespace, map);
        Ok(())
    }

    /// Namespace-extract the entity id, ensure its namespace's index is
    /// loaded, then look it up.
    pub async fn lookup_entity(&self, entity_id: &EntityId) -> Result<Option<EntityIndexEntry>, ManifestError> {
        let namespace = namespace_of(entity_id);
        let entries = self.load_entity_index(namespace.as_str()).await?;
        Ok(entries.get(entity_id.as_str()).cloned())
    }

    /// Fetch (and LRU-cache) a namespace's authoritative R2 manifest. This is
    /// the cache the data flow calls out between a shard's chunk lookup and
    /// its bloom-reject pass (§2): a lookup never talks to the object store
    /// for a manifest directly.
    pub async fn load_r2_manifest<O: ObjectStore + ?Sized>(
        &self,
        object_store: &O,
        namespace: &str,
    ) -> Result<Option<Arc<R2Manifest>>, ManifestError> {
        if let Some(cached) = self.touch_cached_manifest(namespace) {
            return Ok(Some(cached));
        }

        let key = format!("{}/_manifest.json", path_transform(namespace));
        let fetched = object_store
            .get(&key, None)
            .await
            .map_err(|e| ManifestError::StorageRead(e.to_string()))?;
        let Some((_, bytes)) = fetched else {
            return Ok(None);
        };
        let manifest: R2Manifest =
            serde_json::from_slice(&bytes).map_err(|e| ManifestError::InvalidData(e.to_string()))?;
        let manifest = Arc::new(manifest);
        self.insert_cached_manifest(namespace, manifest.clone());
        Ok(Some(manifest))
    }

    fn touch_cached(&self, namespace: &str) -> Option<HashMap<String, EntityIndexEntry>> {
        let mut cache = self.cache.lock().unwrap();
        if !cache.entries.contains_key(namespace) {
            return None;
        }
        cache.order.retain(|n| n != namespace);
        cache.order.push(namespace.to_string());
        cache.entries.get(namespace).cloned()
    }

    fn insert_cached(&self, namespace: &str, entries: HashMap<String, EntityIndexEntry>) {
        let mut cache = self.cache.lock().unwrap();
        cache.order.retain(|n| n != namespace);
        cache.order.push(namespace.to_string());
        cache.entries.insert(namespace.to_string(), entries);
        self.evict_beyond_cap(&mut cache);
    }

    fn touch_cached_manifest(&self, namespace: &str) -> Option<Arc<R2Manifest>> {
        let mut cache = self.cache.lock().unwrap();
        if !cache.manifests.contains_key(namespace) {
            return None;
        }
        cache.order.retain(|n| n != namespace);
        cache.order.push(namespace.to_string());
        cache.manifests.get(namespace).cloned()
    }

    fn insert_cached_manifest(&self, namespace: &str, manifest: Arc<R2Manifest>) {
        let mut cache = self.cache.lock().unwrap();
        cache.order.retain(|n| n != namespace);
        cache.order.push(namespace.to_string());
        cache.manifests.insert(namespace.to_string(), manifest);
        self.evict_beyond_cap(&mut cache);
    }

    fn evict_beyond_cap(&self, cache: &mut Cache) {
        while cache.order.len() > self.config.max_cached_namespaces {
            let evicted = cache.order.remove(0);
            cache.entries.remove(&evicted);
            cache.manifests.remove(&evicted);
        }
    }
}
