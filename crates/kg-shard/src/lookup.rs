//! Graph lookup (C9): entity resolution from an `EntityId` to a hydrated
//! `Entity`, with a V1 full-decode pipeline and a V2 fast path that uses the
//! GraphCol entity index to avoid decoding chunks the entity isn't in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kg_bloom::BloomFilter;
use kg_durable_kv::DurableKv;
use kg_graphcol::{EntityIndex, Footer};
use kg_manifest::ManifestStore;
use kg_model::{namespace_of, EntityId, Triple};
use kg_object_store::{ByteRange, ObjectStore};

use crate::entity::{materialize, Entity};
use crate::error::ShardError;

/// A namespace's manifest resolved through the shard's C7 cache, with its
/// combined bloom filter pre-deserialized for the reject check.
struct ResolvedManifest {
    manifest: Arc<kg_manifest::R2Manifest>,
    combined_bloom: BloomFilter,
}

struct CachedFooter {
    footer: Footer,
    index: EntityIndex,
}

#[derive(Debug, Clone, Default)]
pub struct LookupStats {
    pub range_requests: u32,
    pub full_fetches: u32,
    pub footer_cache_hits: u32,
    pub r2_fetch_ms: u64,
    pub decode_ms: u64,
    pub chunks_checked: u32,
    pub time_ms: u64,
    pub found: bool,
}

/// Suffix length fetched to recover a V2 footer + entity index in one
/// range GET when the index is small enough to fit (§4.9 step 1).
const FOOTER_PROBE_BYTES: u64 = 64 * 1024;

pub struct GraphLookup<S: ObjectStore + ?Sized, K: DurableKv + ?Sized> {
    store: Arc<S>,
    manifest_store: Arc<ManifestStore<K>>,
    footer_cache: Mutex<HashMap<String, Arc<CachedFooter>>>,
}

impl<S: ObjectStore + ?Sized, K: DurableKv + ?Sized> GraphLookup<S, K> {
    pub fn new(store: Arc<S>, manifest_store: Arc<ManifestStore<K>>) -> Self {
        GraphLookup {
            store,
            manifest_store,
            footer_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a namespace's manifest through the shard's manifest store
    /// (C7), per §2's data flow: `C9 -> C7 (manifest cached) -> C1 (reject)
    /// -> C2 (decode)`. No object-store access happens here directly; the
    /// manifest store owns fetching and caching the manifest blob.
    async fn load_manifest(&self, namespace: &str) -> Result<Option<ResolvedManifest>, ShardError> {
        let Some(manifest) = self
            .manifest_store
            .load_r2_manifest(&*self.store, namespace)
            .await
            .map_err(|e| ShardError::InvalidManifest(e.to_string()))?
        else {
            return Ok(None);
        };
        let combined_bloom = BloomFilter::deserialize(&manifest.combined_bloom)
            .map_err(|e| ShardError::InvalidManifest(e.to_string()))?;
        Ok(Some(ResolvedManifest { manifest, combined_bloom }))
    }

    /// V1 pipeline (§4.9): combined-bloom reject, then fully decode every
    /// chunk whose per-chunk bloom might contain the subject.
    #[tracing::instrument(skip(self))]
    pub async fn lookup(&self, entity_id: &EntityId) -> Result<Option<Entity>, ShardError> {
        let namespace = namespace_of(entity_id);
        let Some(cached) = self.load_manifest(namespace.as_str()).await? else {
            return Ok(None);
        };
        if !cached.combined_bloom.might_contain(entity_id.as_str().as_bytes()) {
            return Ok(None);
        }

        let mut triples: Vec<Triple> = Vec::new();
        for chunk in &cached.manifest.chunks {
            let bloom = BloomFilter::deserialize(&chunk.bloom).map_err(|e| ShardError::InvalidManifest(e.to_string()))?;
            if !bloom.might_contain(entity_id.as_str().as_bytes()) {
                continue;
            }
            let Some((_, bytes)) = self.store.get(&chunk.path, None).await.map_err(|e| ShardError::StorageRead(e.to_string()))?
            else {
                continue;
            };
            match kg_graphcol::decode(&bytes) {
                Ok(decoded) => {
                    triples.extend(decoded.into_iter().filter(|t| t.subject == *entity_id));
                }
                Err(e) => {
                    tracing::warn!(chunk = %chunk.path, error = %e, "skipping corrupt chunk in lookup");
                }
            }
        }

        Ok(materialize(entity_id.clone(), &triples))
    }

    /// V2 fast path (§4.9): suffix-range GET of the footer+index, binary
    /// search the index, and only fetch+decode chunks that actually contain
    /// the entity.
    #[tracing::instrument(skip(self))]
    pub async fn lookup_v2(&self, entity_id: &EntityId) -> Result<(Option<Entity>, LookupStats), ShardError> {
        let start = Instant::now();
        let mut stats = LookupStats::default();

        let namespace = namespace_of(entity_id);
        let Some(cached) = self.load_manifest(namespace.as_str()).await? else {
            stats.time_ms = elapsed_ms(start);
            return Ok((None, stats));
        };
        if !cached.combined_bloom.might_contain(entity_id.as_str().as_bytes()) {
            stats.time_ms = elapsed_ms(start);
            return Ok((None, stats));
        }

        let mut triples: Vec<Triple> = Vec::new();
        for chunk in &cached.manifest.chunks {
            stats.chunks_checked += 1;
            let footer_entry = self.footer_and_index(&chunk.path, &mut stats).await?;
            let Some(footer_entry) = footer_entry else { continue };

            if footer_entry.index.lookup(entity_id.as_str()).is_none() {
                continue;
            }

            let fetch_start = Instant::now();
            let Some((_, bytes)) = self
                .store
                .get(&chunk.path, None)
                .await
                .map_err(|e| ShardError::StorageRead(e.to_string()))?
            else {
                continue;
            };
            stats.full_fetches += 1;
            stats.r2_fetch_ms += elapsed_ms(fetch_start);

            let decode_start = Instant::now();
            match kg_graphcol::decode_entity(&bytes, &footer_entry.index, entity_id.as_str()) {
                Ok(Some(decoded)) => triples.extend(decoded),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(chunk = %chunk.path, error = %e, "skipping corrupt chunk in lookupV2");
                }
            }
            stats.decode_ms += elapsed_ms(decode_start);
        }

        let entity = materialize(entity_id.clone(), &triples);
        stats.found = entity.is_some();
        stats.time_ms = elapsed_ms(start);
        tracing::debug!(
            range_requests = stats.range_requests,
            full_fetches = stats.full_fetches,
            footer_cache_hits = stats.footer_cache_hits,
            chunks_checked = stats.chunks_checked,
            time_ms = stats.time_ms,
            found = stats.found,
            "lookupV2 complete"
        );
        Ok((entity, stats))
    }

    async fn footer_and_index(&self, path: &str, stats: &mut LookupStats) -> Result<Option<Arc<CachedFooter>>, ShardError> {
        if let Some(cached) = self.footer_cache.lock().unwrap().get(path).cloned() {
            stats.footer_cache_hits += 1;
            return Ok(Some(cached));
        }

        stats.range_requests += 1;
        let fetch_start = Instant::now();
        let tail = self
            .store
            .get(path, Some(ByteRange::Suffix(FOOTER_PROBE_BYTES)))
            .await
            .map_err(|e| ShardError::StorageRead(e.to_string()))?;
        stats.r2_fetch_ms += elapsed_ms(fetch_start);
        let Some((_, tail_bytes)) = tail else {
            return Ok(None);
        };

        let footer = match kg_graphcol::read_footer(&tail_bytes) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(chunk = %path, error = %e, "chunk missing a readable v2 footer");
                return Ok(None);
            }
        };

        // The index usually sits inside the same tail probe; if the probe
        // missed it (huge entity count), fall back to a dedicated range GET.
        let index_len = footer.index_length as usize;
        let index = if index_len <= tail_bytes.len() {
            let end = tail_bytes.len();
            let start = end.saturating_sub(index_len);
            kg_graphcol::decode_entity_index(&tail_bytes[start..end])
        } else {
            let range_start = Instant::now();
            let fetched = self
                .store
                .get(
                    path,
                    Some(ByteRange::Offset { offset: footer.index_offset, length: Some(footer.index_length) }),
                )
                .await
                .map_err(|e| ShardError::StorageRead(e.to_string()))?;
            stats.range_requests += 1;
            stats.r2_fetch_ms += elapsed_ms(range_start);
            let Some((_, index_bytes)) = fetched else {
                return Ok(None);
            };
            kg_graphcol::decode_entity_index(&index_bytes)
        };

        let index = match index {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(chunk = %path, error = %e, "corrupt v2 entity index");
                return Ok(None);
            }
        };

        let cached = Arc::new(CachedFooter { footer, index });
        self.footer_cache.lock().unwrap().insert(path.to_string(), cached.clone());
        Ok(Some(cached))
    }

    /// Group queries by namespace, then by candidate chunk, so each chunk is
    /// fetched at most once per batch (§4.9). Results preserve request order.
    pub async fn lookup_batch(&self, entity_ids: &[EntityId]) -> Result<Vec<Option<Entity>>, ShardError> {
        let mut by_namespace: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, id) in entity_ids.iter().enumerate() {
            by_namespace.entry(namespace_of(id).as_str().to_string()).or_default().push(i);
        }

        let mut results: Vec<Option<Entity>> = vec![None; entity_ids.len()];
        for (namespace, indices) in by_namespace {
            let Some(cached) = self.load_manifest(&namespace).await? else { continue };

            let mut chunk_cache: HashMap<String, Vec<Triple>> = HashMap::new();
            for &i in &indices {
                let id = &entity_ids[i];
                if !cached.combined_bloom.might_contain(id.as_str().as_bytes()) {
                    continue;
                }
                let mut subject_triples = Vec::new();
                for chunk in &cached.manifest.chunks {
                    let bloom = match BloomFilter::deserialize(&chunk.bloom) {
                        Ok(b) => b,
                        Err(_) => continue,
                    };
                    if !bloom.might_contain(id.as_str().as_bytes()) {
                        continue;
                    }
                    if !chunk_cache.contains_key(&chunk.path) {
                        let fetched = self
                            .store
                            .get(&chunk.path, None)
                            .await
                            .map_err(|e| ShardError::StorageRead(e.to_string()))?;
                        let decoded = match fetched {
                            Some((_, bytes)) => kg_graphcol::decode(&bytes).unwrap_or_default(),
                            None => Vec::new(),
                        };
                        chunk_cache.insert(chunk.path.clone(), decoded);
                    }
                    subject_triples.extend(
                        chunk_cache[&chunk.path].iter().filter(|t| t.subject == *id).cloned(),
                    );
                }
                results[i] = materialize(id.clone(), &subject_triples);
            }
        }
        Ok(results)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kg_durable_kv::InMemoryDurableKv;
    use kg_graphcol::GraphColVersion;
    use kg_manifest::ManifestStoreConfig;
    use kg_model::{path_transform, TxId, TypedObject};
    use kg_object_store::InMemoryObjectStore;

    fn manifest_store() -> Arc<ManifestStore<InMemoryDurableKv>> {
        Arc::new(ManifestStore::new(Arc::new(InMemoryDurableKv::new()), ManifestStoreConfig::default()))
    }

    fn triple(subject: &str, predicate: &str, ts: u64) -> Triple {
        Triple {
            subject: subject.parse().unwrap(),
            predicate: predicate.parse().unwrap(),
            object: TypedObject::String(format!("v{ts}")),
            timestamp: ts,
            tx_id: TxId::from_parts(ts, 0),
        }
    }

    async fn seed_namespace(store: &InMemoryObjectStore, namespace: &str, triples: &[Triple], version: GraphColVersion) {
        let prefix = path_transform(namespace);
        let chunk_bytes = kg_graphcol::encode(triples, version);
        let chunk_path = format!("{prefix}/_chunks/c1.gcol");
        store.put(&chunk_path, Bytes::from(chunk_bytes.clone()), None).await.unwrap();

        let mut bloom = BloomFilter::new(10, 0.01);
        for t in triples {
            bloom.add(t.subject.as_str().as_bytes());
        }
        let manifest = kg_manifest::R2Manifest {
            namespace: namespace.to_string(),
            version: "v1".to_string(),
            chunks: vec![kg_manifest::R2ChunkEntry {
                id: "c1".to_string(),
                path: chunk_path,
                triple_count: triples.len() as u32,
                min_time: 0,
                max_time: 10,
                bytes: chunk_bytes.len() as u64,
                bloom: bloom.serialize(),
            }],
            combined_bloom: bloom.serialize(),
            created_at: 0,
        };
        let manifest_path = format!("{prefix}/_manifest.json");
        store.put(&manifest_path, Bytes::from(serde_json::to_vec(&manifest).unwrap()), None).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_v1_resolves_entity_across_bloom_and_decode() {
        let store = Arc::new(InMemoryObjectStore::new());
        let triples = vec![triple("https://example.com/e/1", "name", 1)];
        seed_namespace(&store, "https://example.com/e", &triples, GraphColVersion::V1).await;

        let lookup = GraphLookup::new(store, manifest_store());
        let id: EntityId = "https://example.com/e/1".parse().unwrap();
        let entity = lookup.lookup(&id).await.unwrap().unwrap();
        assert_eq!(entity.id, id);
    }

    #[tokio::test]
    async fn lookup_v1_returns_none_for_absent_entity() {
        let store = Arc::new(InMemoryObjectStore::new());
        let triples = vec![triple("https://example.com/e/1", "name", 1)];
        seed_namespace(&store, "https://example.com/e", &triples, GraphColVersion::V1).await;

        let lookup = GraphLookup::new(store, manifest_store());
        let id: EntityId = "https://example.com/e/999".parse().unwrap();
        assert!(lookup.lookup(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_v2_uses_entity_index_and_reports_stats() {
        let store = Arc::new(InMemoryObjectStore::new());
        let triples = vec![triple("https://example.com/e/1", "name", 1)];
        seed_namespace(&store, "https://example.com/e", &triples, GraphColVersion::V2).await;

        let lookup = GraphLookup::new(store, manifest_store());
        let id: EntityId = "https://example.com/e/1".parse().unwrap();
        let (entity, stats) = lookup.lookup_v2(&id).await.unwrap();
        assert!(entity.is_some());
        assert!(stats.found);
        assert_eq!(stats.chunks_checked, 1);

        // Second lookup against the same chunk should hit the footer cache.
        let (_, stats2) = lookup.lookup_v2(&id).await.unwrap();
        assert_eq!(stats2.footer_cache_hits, 1);
    }

    #[tokio::test]
    async fn lookup_v2_rejects_absent_entity_without_full_fetch() {
        let store = Arc::new(InMemoryObjectStore::new());
        let triples = vec![triple("https://example.com/e/1", "name", 1)];
        seed_namespace(&store, "https://example.com/e", &triples, GraphColVersion::V2).await;

        let lookup = GraphLookup::new(store, manifest_store());
        let id: EntityId = "https://example.com/e/999".parse().unwrap();
        let (entity, stats) = lookup.lookup_v2(&id).await.unwrap();
        assert!(entity.is_none());
        assert_eq!(stats.full_fetches, 0, "absent entity must not trigger a full chunk fetch");
    }

    #[tokio::test]
    async fn lookup_batch_preserves_request_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let triples = vec![triple("https://example.com/e/1", "name", 1), triple("https://example.com/e/2", "name", 1)];
        seed_namespace(&store, "https://example.com/e", &triples, GraphColVersion::V1).await;

        let lookup = GraphLookup::new(store, manifest_store());
        let ids: Vec<EntityId> = vec![
            "https://example.com/e/2".parse().unwrap(),
            "https://example.com/e/1".parse().unwrap(),
            "https://example.com/e/missing".parse().unwrap(),
        ];
        let results = lookup.lookup_batch(&ids).await.unwrap();
        assert_eq!(results[0].as_ref().unwrap().id, ids[0]);
        assert_eq!(results[1].as_ref().unwrap().id, ids[1]);
        assert!(results[2].is_none());
    }
}
