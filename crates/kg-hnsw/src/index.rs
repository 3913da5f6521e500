//! Hierarchical Navigable Small World graph construction and search
//! (§4.12). The live graph and its vectors are kept in memory for
//! low-latency insert/search; every mutation is mirrored to the pluggable
//! `GraphStore`/`VectorStore` for durability.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::error::HnswError;
use crate::metric::DistanceMetric;
use crate::store::{GraphMeta, GraphStore, NodeRecord, VectorStore};
use crate::NodeId;

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FloatOrd(f32);

impl Eq for FloatOrd {}
impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}
impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct GraphState {
    entry_point: Option<NodeId>,
    max_layer: usize,
    nodes: HashMap<NodeId, NodeRecord>,
    vectors: HashMap<NodeId, Vec<f32>>,
}

impl GraphState {
    fn empty() -> Self {
        GraphState { entry_point: None, max_layer: 0, nodes: HashMap::new(), vectors: HashMap::new() }
    }
}

pub struct HnswIndex<G: GraphStore + ?Sized, V: VectorStore + ?Sized> {
    graph_store: Arc<G>,
    vector_store: Arc<V>,
    metric: DistanceMetric,
    m: usize,
    m0: usize,
    ef_construction: usize,
    m_l: f64,
    state: Mutex<GraphState>,
}

/// `level ~ floor(-ln(U) * mL)`, `U` uniform on `(0, 1]`.
fn draw_level(m_l: f64) -> usize {
    let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
    (-u.ln() * m_l).floor() as usize
}

fn select_neighbors_simple(candidates: &[(NodeId, f32)], budget: usize) -> Vec<NodeId> {
    candidates.iter().take(budget).map(|(id, _)| *id).collect()
}

fn search_layer(
    state: &GraphState,
    metric: DistanceMetric,
    query: &[f32],
    entry_points: &[NodeId],
    ef: usize,
    layer: usize,
) -> Vec<(NodeId, f32)> {
    let mut visited: HashSet<NodeId> = entry_points.iter().copied().collect();
    let mut candidates: BinaryHeap<std::cmp::Reverse<(FloatOrd, NodeId)>> = BinaryHeap::new();
    let mut results: BinaryHeap<(FloatOrd, NodeId)> = BinaryHeap::new();

    for &ep in entry_points {
        if let Some(v) = state.vectors.get(&ep) {
            let d = metric.distance(query, v);
            candidates.push(std::cmp::Reverse((FloatOrd(d), ep)));
            results.push((FloatOrd(d), ep));
        }
    }

    while let Some(std::cmp::Reverse((FloatOrd(cur_dist), current))) = candidates.pop() {
        let worst = results.peek().map(|(FloatOrd(d), _)| *d).unwrap_or(f32::INFINITY);
        if results.len() >= ef && cur_dist > worst {
            break;
        }
        let Some(record) = state.nodes.get(&current) else { continue };
        let Some(neighbors) = record.connections.get(layer) else { continue };
        for &n in neighbors {
            if !visited.insert(n) {
                continue;
            }
            let Some(v) = state.vectors.get(&n) else { continue };
            let d = metric.distance(query, v);
            let worst = results.peek().map(|(FloatOrd(d), _)| *d).unwrap_or(f32::INFINITY);
            if results.len() < ef || d < worst {
                candidates.push(std::cmp::Reverse((FloatOrd(d), n)));
                results.push((FloatOrd(d), n));
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<(NodeId, f32)> = results.into_iter().map(|(FloatOrd(d), id)| (id, d)).collect();
    out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    out
}

impl<G: GraphStore + ?Sized, V: VectorStore + ?Sized> HnswIndex<G, V> {
    pub fn new(graph_store: Arc<G>, vector_store: Arc<V>, metric: DistanceMetric, m: usize, ef_construction: usize) -> Self {
        HnswIndex {
            graph_store,
            vector_store,
            metric,
            m,
            m0: m * 2,
            ef_construction,
            m_l: 1.0 / (m as f64).ln(),
            state: Mutex::new(GraphState::empty()),
        }
    }

    pub fn with_defaults(graph_store: Arc<G>, vector_store: Arc<V>, metric: DistanceMetric) -> Self {
        Self::new(graph_store, vector_store, metric, DEFAULT_M, DEFAULT_EF_CONSTRUCTION)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn max_layer(&self) -> usize {
        self.state.lock().unwrap().max_layer
    }

    pub fn entry_point(&self) -> Option<NodeId> {
        self.state.lock().unwrap().entry_point
    }

    /// Loads every persisted node and vector into memory. Call once at
    /// startup before `insert`/`search`.
    pub async fn load_snapshot(&self) -> Result<(), HnswError> {
        let meta = self.graph_store.load_meta()?.unwrap_or_default();
        let records = self.graph_store.all_nodes()?;
        let mut state = self.state.lock().unwrap();
        state.entry_point = meta.entry_point;
        state.max_layer = meta.max_layer;
        for record in records {
            state.nodes.insert(record.node_id, record);
        }
        drop(state);
        let node_ids: Vec<NodeId> = self.state.lock().unwrap().nodes.keys().copied().collect();
        for node_id in node_ids {
            if let Some(vector) = self.vector_store.get_vector(node_id).await? {
                self.state.lock().unwrap().vectors.insert(node_id, vector);
            }
        }
        Ok(())
    }

    /// Duplicate insert (an already-present `node_id`) is a no-op (§7).
    pub async fn insert(&self, node_id: NodeId, vector: Vec<f32>) -> Result<(), HnswError> {
        {
            let state = self.state.lock().unwrap();
            if state.nodes.contains_key(&node_id) {
                return Ok(());
            }
        }

        self.vector_store.put_vector(node_id, &vector).await?;

        let level = draw_level(self.m_l);
        let mut touched: Vec<NodeRecord> = Vec::new();

        let (own_record, _became_entry_point) = {
            let mut state = self.state.lock().unwrap();
            state.vectors.insert(node_id, vector.clone());

            if state.entry_point.is_none() {
                let record = NodeRecord { node_id, max_layer: level, connections: vec![Vec::new(); level + 1] };
                state.entry_point = Some(node_id);
                state.max_layer = level;
                state.nodes.insert(node_id, record.clone());
                (record, true)
            } else {
                let mut entry = state.entry_point.unwrap();
                let top_layer = state.max_layer;

                for layer in (level + 1..=top_layer).rev() {
                    let nearest = search_layer(&state, self.metric, &vector, &[entry], 1, layer);
                    if let Some((best, _)) = nearest.first() {
                        entry = *best;
                    }
                }

                let mut connections: Vec<Vec<NodeId>> = vec![Vec::new(); level + 1];
                let mut entry_points = vec![entry];
                for layer in (0..=level.min(top_layer)).rev() {
                    let candidates = search_layer(&state, self.metric, &vector, &entry_points, self.ef_construction, layer);
                    let budget = if layer == 0 { self.m0 } else { self.m };
                    let selected = select_neighbors_simple(&candidates, budget);
                    connections[layer] = selected.clone();
                    if !selected.is_empty() {
                        entry_points = selected.clone();
                    }

                    for &neighbor in &selected {
                        let neighbor_vector = state.vectors.get(&neighbor).cloned();
                        let Some(neighbor_vector) = neighbor_vector else { continue };
                        let Some(neighbor_record) = state.nodes.get_mut(&neighbor) else { continue };
                        if layer >= neighbor_record.connections.len() {
                            continue;
                        }
                        neighbor_record.connections[layer].push(node_id);
                        let neighbor_budget = if layer == 0 { self.m0 } else { self.m };
                        let over_budget = neighbor_record.connections[layer].len() > neighbor_budget;
                        if over_budget {
                            let ids: Vec<NodeId> = neighbor_record.connections[layer].clone();
                            drop(neighbor_record);
                            let mut scored: Vec<(NodeId, f32)> = ids
                                .iter()
                                .filter_map(|&cand| state.vectors.get(&cand).map(|v| (cand, self.metric.distance(&neighbor_vector, v))))
                                .collect();
                            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
                            scored.truncate(neighbor_budget);
                            let pruned: Vec<NodeId> = scored.into_iter().map(|(id, _)| id).collect();
                            if let Some(r) = state.nodes.get_mut(&neighbor) {
                                r.connections[layer] = pruned;
                            }
                        }
                        if let Some(r) = state.nodes.get(&neighbor) {
                            touched.push(r.clone());
                        }
                    }
                }

                let record = NodeRecord { node_id, max_layer: level, connections };
                state.nodes.insert(node_id, record.clone());

                let became_entry = level > state.max_layer;
                if became_entry {
                    state.entry_point = Some(node_id);
                    state.max_layer = level;
                }
                (record, became_entry)
            }
        };

        let (entry_point, max_layer, node_count) = {
            let state = self.state.lock().unwrap();
            (state.entry_point, state.max_layer, state.nodes.len())
        };

        self.graph_store.save_node(&own_record)?;
        for record in touched {
            self.graph_store.save_node(&record)?;
        }
        self.graph_store.save_meta(&GraphMeta { entry_point, max_layer, node_count })?;
        Ok(())
    }

    /// Top-`k` nearest neighbors to `query`, beam width `ef`. Returns an
    /// empty list on an empty graph.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(NodeId, f32)> {
        let state = self.state.lock().unwrap();
        let Some(mut entry) = state.entry_point else { return Vec::new() };
        let top_layer = state.max_layer;

        for layer in (1..=top_layer).rev() {
            let nearest = search_layer(&state, self.metric, query, &[entry], 1, layer);
            if let Some((best, _)) = nearest.first() {
                entry = *best;
            }
        }

        let beam = ef.max(k);
        let mut results = search_layer(&state, self.metric, query, &[entry], beam, 0);
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ObjectStoreVectorStore, SqliteGraphStore};
    use kg_object_store::InMemoryObjectStore;

    fn index() -> HnswIndex<SqliteGraphStore, ObjectStoreVectorStore<InMemoryObjectStore>> {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let vectors = Arc::new(ObjectStoreVectorStore::new(Arc::new(InMemoryObjectStore::new()), "ns"));
        HnswIndex::new(graph, vectors, DistanceMetric::Euclidean, 4, 50)
    }

    #[tokio::test]
    async fn first_insert_becomes_entry_point_with_no_connections() {
        let idx = index();
        idx.insert(1, vec![0.0, 0.0]).await.unwrap();
        assert_eq!(idx.entry_point(), Some(1));
        assert_eq!(idx.node_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_no_op() {
        let idx = index();
        idx.insert(1, vec![0.0, 0.0]).await.unwrap();
        idx.insert(1, vec![9.0, 9.0]).await.unwrap();
        assert_eq!(idx.node_count(), 1);
    }

    #[tokio::test]
    async fn search_returns_nearest_point_first() {
        let idx = index();
        idx.insert(1, vec![0.0, 0.0]).await.unwrap();
        idx.insert(2, vec![10.0, 10.0]).await.unwrap();
        idx.insert(3, vec![0.5, 0.5]).await.unwrap();
        let results = idx.search(&[0.0, 0.0], 2, 50);
        assert_eq!(results[0].0, 1);
    }

    #[tokio::test]
    async fn search_on_empty_graph_returns_empty() {
        let idx = index();
        assert!(idx.search(&[0.0, 0.0], 5, 10).is_empty());
    }

    #[tokio::test]
    async fn layer_0_degree_never_exceeds_m0() {
        let idx = index();
        for i in 0..40u64 {
            idx.insert(i, vec![i as f32, (i % 7) as f32]).await.unwrap();
        }
        let state = idx.state.lock().unwrap();
        for record in state.nodes.values() {
            assert!(record.connections[0].len() <= idx.m0);
        }
    }

    #[tokio::test]
    async fn recall_at_10_is_high_on_random_normalized_vectors() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let idx = HnswIndex::new(
            Arc::new(SqliteGraphStore::open_in_memory().unwrap()),
            Arc::new(ObjectStoreVectorStore::new(Arc::new(InMemoryObjectStore::new()), "ns")),
            DistanceMetric::Cosine,
            16,
            200,
        );

        let mut vectors = Vec::new();
        for i in 0..100u64 {
            let mut v: Vec<f32> = (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in &mut v {
                *x /= norm;
            }
            idx.insert(i, v.clone()).await.unwrap();
            vectors.push(v);
        }

        let query = &vectors[0];
        let mut brute: Vec<(u64, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u64, DistanceMetric::Cosine.distance(query, v)))
            .collect();
        brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let truth: HashSet<u64> = brute.iter().take(10).map(|(id, _)| *id).collect();

        let approx = idx.search(query, 10, 100);
        let hits = approx.iter().filter(|(id, _)| truth.contains(id)).count();
        assert!(hits as f64 / 10.0 >= 0.9, "recall@10 was {hits}/10");
    }

    #[tokio::test]
    async fn layer_population_is_non_increasing_with_level() {
        let idx = index();
        for i in 0..60u64 {
            idx.insert(i, vec![i as f32, (i % 11) as f32]).await.unwrap();
        }
        let state = idx.state.lock().unwrap();
        let mut counts = Vec::new();
        for layer in 0..=state.max_layer {
            let count = state.nodes.values().filter(|r| r.max_layer >= layer).count();
            counts.push(count);
        }
        for window in counts.windows(2) {
            assert!(window[0] >= window[1], "layer population grew: {counts:?}");
        }
    }

    #[tokio::test]
    async fn layer_0_connectivity_is_high_after_many_inserts() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let idx = index();
        for i in 0..40u64 {
            let v: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();
            idx.insert(i, v).await.unwrap();
        }
        let state = idx.state.lock().unwrap();
        let connected = state.nodes.values().filter(|r| !r.connections[0].is_empty()).count();
        let fraction = connected as f64 / state.nodes.len() as f64;
        assert!(fraction >= 0.9, "layer-0 connectivity was {fraction} ({connected}/{})", state.nodes.len());
    }
}
