//! The per-shard data plane: graph lookup (C9), the chunk store write path
//! (C10), and the BFS traversal executor (C14). These share one shard's
//! blob-store client and SQLite connection.

mod chunk_store;
mod entity;
mod error;
mod lookup;
mod traversal;

pub use chunk_store::{ChunkRow, ChunkStore, ChunkStoreStats, MIN_CHUNKS_FOR_COMPACTION, MIN_CHUNK_SIZE_FOR_COMPACTION};
pub use entity::{materialize, Entity};
pub use error::ShardError;
pub use lookup::{GraphLookup, LookupStats};
pub use traversal::{
    TraversalExecutor, TraversalResult, TraversalStats, DEFAULT_PATH_DEPTH, MAX_EDGES_PER_ENTITY, MAX_FINAL_IDS,
    MAX_FRONTIER, MAX_PATH_DEPTH,
};
