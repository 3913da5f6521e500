//! Traversal executor (C14): capped BFS over `lookupV2`, bounding worst-case
//! work at `10 × MAX_PATH_DEPTH` lookups (§4.14).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use kg_durable_kv::DurableKv;
use kg_model::EntityId;
use kg_object_store::ObjectStore;

use crate::error::ShardError;
use crate::lookup::GraphLookup;

pub const MAX_FRONTIER: usize = 10;
pub const MAX_EDGES_PER_ENTITY: usize = 5;
pub const MAX_PATH_DEPTH: u32 = 100;
pub const DEFAULT_PATH_DEPTH: u32 = 3;
pub const MAX_FINAL_IDS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct TraversalStats {
    pub total_time_ms: u64,
    pub r2_fetches: u64,
    pub entities_visited: u64,
    pub hop_times_ms: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct TraversalResult {
    pub start_id: EntityId,
    pub depth: u32,
    pub final_ids: Vec<EntityId>,
    pub stats: TraversalStats,
}

pub struct TraversalExecutor<S: ObjectStore + ?Sized, K: DurableKv + ?Sized> {
    lookup: Arc<GraphLookup<S, K>>,
}

impl<S: ObjectStore + ?Sized, K: DurableKv + ?Sized> TraversalExecutor<S, K> {
    pub fn new(lookup: Arc<GraphLookup<S, K>>) -> Self {
        TraversalExecutor { lookup }
    }

    /// `depth` is clamped to `[0, MAX_PATH_DEPTH]`; `None` uses the default
    /// of 3.
    pub async fn traverse(&self, start: &EntityId, depth: Option<u32>) -> Result<TraversalResult, ShardError> {
        let depth = depth.unwrap_or(DEFAULT_PATH_DEPTH).min(MAX_PATH_DEPTH);
        let start_time = Instant::now();

        let mut visited: HashSet<EntityId> = HashSet::new();
        visited.insert(start.clone());
        let mut frontier = vec![start.clone()];
        let mut hop_times_ms = Vec::new();
        let mut r2_fetches = 0u64;

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let hop_start = Instant::now();
            let mut next_frontier: Vec<EntityId> = Vec::new();

            for id in &frontier {
                let (entity, stats) = self.lookup.lookup_v2(id).await?;
                r2_fetches += (stats.full_fetches + stats.range_requests) as u64;

                if let Some(entity) = entity {
                    let mut edges: Vec<EntityId> = entity.edges.values().flatten().cloned().collect();
                    edges.truncate(MAX_EDGES_PER_ENTITY);
                    for target in edges {
                        if visited.insert(target.clone()) {
                            next_frontier.push(target);
                        }
                    }
                }
            }

            next_frontier.truncate(MAX_FRONTIER);
            hop_times_ms.push(elapsed_ms(hop_start));
            frontier = next_frontier;
        }

        let mut final_ids: Vec<EntityId> = visited.iter().filter(|id| *id != start).cloned().collect();
        final_ids.truncate(MAX_FINAL_IDS);

        Ok(TraversalResult {
            start_id: start.clone(),
            depth,
            final_ids,
            stats: TraversalStats {
                total_time_ms: elapsed_ms(start_time),
                r2_fetches,
                entities_visited: visited.len() as u64,
                hop_times_ms,
            },
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kg_bloom::BloomFilter;
    use kg_durable_kv::InMemoryDurableKv;
    use kg_graphcol::GraphColVersion;
    use kg_manifest::{ManifestStore, ManifestStoreConfig};
    use kg_model::{path_transform, Triple, TxId, TypedObject};
    use kg_object_store::InMemoryObjectStore;

    fn manifest_store() -> Arc<ManifestStore<InMemoryDurableKv>> {
        Arc::new(ManifestStore::new(Arc::new(InMemoryDurableKv::new()), ManifestStoreConfig::default()))
    }

    fn triple(subject: &str, predicate: &str, object: TypedObject, ts: u64) -> Triple {
        Triple {
            subject: subject.parse().unwrap(),
            predicate: predicate.parse().unwrap(),
            object,
            timestamp: ts,
            tx_id: TxId::from_parts(ts, 0),
        }
    }

    async fn seed(store: &InMemoryObjectStore, namespace: &str, triples: &[Triple]) {
        let prefix = path_transform(namespace);
        let chunk_bytes = kg_graphcol::encode(triples, GraphColVersion::V2);
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
        store
            .put(&format!("{prefix}/_manifest.json"), Bytes::from(serde_json::to_vec(&manifest).unwrap()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bfs_follows_edges_up_to_depth() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a: EntityId = "https://example.com/e/a".parse().unwrap();
        let b: EntityId = "https://example.com/e/b".parse().unwrap();
        let c: EntityId = "https://example.com/e/c".parse().unwrap();
        let triples = vec![
            triple(a.as_str(), "next", TypedObject::Ref(b.clone()), 1),
            triple(b.as_str(), "next", TypedObject::Ref(c.clone()), 1),
        ];
        seed(&store, "https://example.com/e", &triples).await;

        let lookup = Arc::new(GraphLookup::new(store, manifest_store()));
        let executor = TraversalExecutor::new(lookup);
        let result = executor.traverse(&a, Some(2)).await.unwrap();

        assert_eq!(result.start_id, a);
        assert!(result.final_ids.contains(&b));
        assert!(result.final_ids.contains(&c));
        assert_eq!(result.stats.hop_times_ms.len(), 2);
    }

    #[tokio::test]
    async fn depth_zero_visits_only_the_start() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a: EntityId = "https://example.com/e/a".parse().unwrap();
        let b: EntityId = "https://example.com/e/b".parse().unwrap();
        let triples = vec![triple(a.as_str(), "next", TypedObject::Ref(b.clone()), 1)];
        seed(&store, "https://example.com/e", &triples).await;

        let lookup = Arc::new(GraphLookup::new(store, manifest_store()));
        let executor = TraversalExecutor::new(lookup);
        let result = executor.traverse(&a, Some(0)).await.unwrap();
        assert!(result.final_ids.is_empty());
        assert_eq!(result.stats.entities_visited, 1);
    }

    #[tokio::test]
    async fn depth_is_clamped_to_max_path_depth() {
        let store = Arc::new(InMemoryObjectStore::new());
        let a: EntityId = "https://example.com/e/a".parse().unwrap();
        seed(&store, "https://example.com/e", &[]).await;

        let lookup = Arc::new(GraphLookup::new(store, manifest_store()));
        let executor = TraversalExecutor::new(lookup);
        let result = executor.traverse(&a, Some(10_000)).await.unwrap();
        assert_eq!(result.depth, MAX_PATH_DEPTH);
    }
}
