//! Hierarchical Navigable Small World vector index (C12): approximate
//! k-nearest-neighbor search over float vectors with pluggable graph and
//! vector backing stores.

mod error;
mod index;
mod metric;
mod store;

pub type NodeId = u64;

pub use error::HnswError;
pub use index::{HnswIndex, DEFAULT_EF, DEFAULT_EF_CONSTRUCTION, DEFAULT_M};
pub use metric::DistanceMetric;
pub use store::{GraphMeta, GraphStore, NodeRecord, ObjectStoreVectorStore, SqliteGraphStore, VectorStore};
