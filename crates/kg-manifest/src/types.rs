use serde::{Deserialize, Serialize};

/// A per-file manifest row, cached shard-locally under
/// `manifest:{namespace}:{path}` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestRow {
    pub namespace: String,
    pub path: String,
    pub footer_offset: u64,
    pub footer_size: u64,
    pub entity_count: u32,
    pub version: String,
    pub updated_at: u64,
}

/// One entity's location inside a chunk, cached under `entity:{entityId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityIndexEntry {
    pub entity_id: String,
    pub file_path: String,
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// `{namespace, chunks[], combinedBloom, createdAt}` — the authoritative
/// R2-resident catalog of chunks for one namespace (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct R2Manifest {
    pub namespace: String,
    pub version: String,
    pub chunks: Vec<R2ChunkEntry>,
    pub combined_bloom: kg_bloom::SerializedBloom,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct R2ChunkEntry {
    pub id: String,
    pub path: String,
    pub triple_count: u32,
    pub min_time: u64,
    pub max_time: u64,
    pub bytes: u64,
    pub bloom: kg_bloom::SerializedBloom,
}
