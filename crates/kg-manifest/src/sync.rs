//! Manifest sync (C8): bidirectional synchroniser between the authoritative
//! R2 manifest JSON and the shard-local manifest store, with R2 as tiebreaker.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use kg_durable_kv::DurableKv;
use kg_object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::store::ManifestStore;
use crate::types::{ManifestRow, R2Manifest};

/// Suffix length fetched to recover a chunk's V2 footer + entity index in
/// one range GET, mirroring `kg-shard`'s `lookupV2` probe.
const FOOTER_PROBE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Push,
    Pull,
    None,
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub success: bool,
    pub direction: SyncDirection,
    pub entries_updated: usize,
    pub conflicts: u32,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
}

impl SyncResult {
    fn noop() -> Self {
        SyncResult {
            success: true,
            direction: SyncDirection::None,
            entries_updated: 0,
            conflicts: 0,
            error: None,
            error_code: None,
        }
    }

    fn failed(direction: SyncDirection, err: &SyncError) -> Self {
        SyncResult {
            success: false,
            direction,
            entries_updated: 0,
            conflicts: 0,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<u64>,
    pub cached_r2_version: Option<String>,
    pub sync_in_progress: bool,
}

pub struct ManifestSync<O: ObjectStore + ?Sized, K: DurableKv + ?Sized> {
    store: Arc<ManifestStore<K>>,
    object_store: Arc<O>,
    manifest_key: String,
    status: Mutex<SyncStatus>,
}

impl<O: ObjectStore + ?Sized, K: DurableKv + ?Sized> ManifestSync<O, K> {
    pub fn new(store: Arc<ManifestStore<K>>, object_store: Arc<O>, manifest_key: impl Into<String>) -> Self {
        ManifestSync {
            store,
            object_store,
            manifest_key: manifest_key.into(),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        self.status.lock().await.clone()
    }

    async fn fetch_r2(&self) -> Result<Option<R2Manifest>, SyncError> {
        let fetched = self
            .object_store
            .get(&self.manifest_key, None)
            .await
            .map_err(|e| SyncError::R2FetchFailed(e.to_string()))?;
        match fetched {
            None => Ok(None),
            Some((_, bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SyncError::InvalidManifest(e.to_string())),
        }
    }

    async fn write_r2(&self, manifest: &R2Manifest) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec(manifest).map_err(|e| SyncError::ExportFailed(e.to_string()))?;
        self.object_store
            .put(&self.manifest_key, Bytes::from(bytes), Some("application/json".to_string()))
            .await
            .map_err(|e| SyncError::R2WriteFailed(e.to_string()))
    }

    /// Fetch R2's manifest and import it into the local store. A no-op
    /// (success) if R2 has no manifest yet.
    pub async fn sync_from_r2(&self) -> SyncResult {
        self.with_sync_lock(|| async {
            match self.fetch_r2().await {
                Ok(None) => Ok(SyncResult::noop()),
                Ok(Some(manifest)) => match self.import(&manifest).await {
                    Ok(updated) => {
                        self.commit_version(manifest.version).await;
                        Ok(SyncResult {
                            success: true,
                            direction: SyncDirection::Pull,
                            entries_updated: updated,
                            conflicts: 0,
                            error: None,
                            error_code: None,
                        })
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Export the local store to R2 format and write it, skipping if empty.
    pub async fn sync_to_r2(&self) -> SyncResult {
        self.with_sync_lock(|| async {
            let manifest = self.export().await?;
            if manifest.chunks.is_empty() {
                return Ok(SyncResult::noop());
            }
            let updated = manifest.chunks.len();
            self.write_r2(&manifest).await?;
            self.commit_version(manifest.version).await;
            Ok(SyncResult {
                success: true,
                direction: SyncDirection::Push,
                entries_updated: updated,
                conflicts: 0,
                error: None,
                error_code: None,
            })
        })
        .await
    }

    /// Fetch R2 once and reconcile: neither present → noop; R2 empty with
    /// local data → push; local empty, or versions differ → pull (R2 wins,
    /// counted as a conflict); equal versions → noop.
    pub async fn full_sync(&self) -> SyncResult {
        self.with_sync_lock(|| async {
            let r2 = self.fetch_r2().await?;
            let local = self.export().await.ok();

            match (r2, local) {
                (None, None) => Ok(SyncResult::noop()),
                (None, Some(local)) if !local.chunks.is_empty() => {
                    let updated = local.chunks.len();
                    self.write_r2(&local).await?;
                    self.commit_version(local.version).await;
                    Ok(SyncResult {
                        success: true,
                        direction: SyncDirection::Push,
                        entries_updated: updated,
                        conflicts: 0,
                        error: None,
                        error_code: None,
                    })
                }
                (Some(r2), local) => {
                    let versions_differ = local.as_ref().map_or(true, |l| l.version != r2.version);
                    if !versions_differ {
                        return Ok(SyncResult::noop());
                    }
                    let updated = self.import(&r2).await?;
                    self.commit_version(r2.version).await;
                    Ok(SyncResult {
                        success: true,
                        direction: SyncDirection::Pull,
                        entries_updated: updated,
                        conflicts: 1,
                        error: None,
                        error_code: None,
                    })
                }
                (None, Some(_)) => Ok(SyncResult::noop()),
            }
        })
        .await
    }

    pub async fn needs_sync(&self) -> bool {
        let status = self.status.lock().await;
        match self.fetch_r2().await {
            Ok(Some(r2)) => status.cached_r2_version.as_deref() != Some(r2.version.as_str()),
            _ => false,
        }
    }

    /// Pull each chunk's real per-entity index (§4.2/§4.9's entity index,
    /// read via a suffix-range probe the same way a V2 lookup does) and
    /// import one `EntityIndexEntry` per entity, not per chunk. Chunks
    /// without a readable V2 footer (e.g. V1-encoded) contribute no rows and
    /// are skipped with a warning rather than fabricated.
    async fn import(&self, manifest: &R2Manifest) -> Result<usize, SyncError> {
        let mut entries = Vec::new();
        let mut rows = Vec::new();
        for chunk in &manifest.chunks {
            match self.entity_index_for_chunk(&chunk.path).await {
                Ok(Some(index)) => {
                    for entry in index.entries() {
                        entries.push(crate::types::EntityIndexEntry {
                            entity_id: entry.entity_id.clone(),
                            file_path: chunk.path.clone(),
                            byte_offset: entry.byte_offset,
                            byte_length: entry.byte_length,
                        });
                    }
                    rows.push(ManifestRow {
                        namespace: manifest.namespace.clone(),
                        path: chunk.path.clone(),
                        footer_offset: 0,
                        footer_size: 0,
                        entity_count: chunk.triple_count,
                        version: manifest.version.clone(),
                        updated_at: now_millis(),
                    });
                }
                Ok(None) => {
                    tracing::warn!(chunk = %chunk.path, "chunk has no V2 entity index to import");
                }
                Err(e) => {
                    tracing::warn!(chunk = %chunk.path, error = %e, "failed to read entity index while importing manifest");
                }
            }
        }

        let count = entries.len();
        self.store
            .put_entity_index(&manifest.namespace, entries)
            .await
            .map_err(|e| SyncError::ImportFailed(e.to_string()))?;
        for row in rows {
            self.store.put(row).await.map_err(|e| SyncError::ImportFailed(e.to_string()))?;
        }
        Ok(count)
    }

    /// Suffix-range fetch a chunk's footer, then its entity index, following
    /// `kg-shard`'s `lookupV2` recovery path. `None` means the chunk has no
    /// V2 footer (not an error: V1 chunks simply predate the entity index).
    async fn entity_index_for_chunk(&self, path: &str) -> Result<Option<kg_graphcol::EntityIndex>, SyncError> {
        let tail = self
            .object_store
            .get(path, Some(kg_object_store::ByteRange::Suffix(FOOTER_PROBE_BYTES)))
            .await
            .map_err(|e| SyncError::R2FetchFailed(e.to_string()))?;
        let Some((_, tail_bytes)) = tail else {
            return Ok(None);
        };
        let Ok(footer) = kg_graphcol::read_footer(&tail_bytes) else {
            return Ok(None);
        };

        let index_len = footer.index_length as usize;
        let index_bytes = if index_len <= tail_bytes.len() {
            let end = tail_bytes.len();
            let start = end.saturating_sub(index_len);
            tail_bytes.slice(start..end)
        } else {
            let fetched = self
                .object_store
                .get(path, Some(kg_object_store::ByteRange::Offset { offset: footer.index_offset, length: Some(footer.index_length) }))
                .await
                .map_err(|e| SyncError::R2FetchFailed(e.to_string()))?;
            let Some((_, bytes)) = fetched else {
                return Ok(None);
            };
            bytes
        };

        kg_graphcol::decode_entity_index(&index_bytes)
            .map(Some)
            .map_err(|e| SyncError::InvalidManifest(e.to_string()))
    }

    /// Rebuild an `R2Manifest` from whatever the local store has actually
    /// accumulated via `put`/`put_entity_index` (real `ManifestRow`s plus
    /// their per-entity counts), instead of synthesizing placeholder chunks.
    async fn export(&self) -> Result<R2Manifest, SyncError> {
        let namespace = self.manifest_key.trim_end_matches("_manifest.json").to_string();
        let rows = self
            .store
            .list(&namespace)
            .await
            .map_err(|e| SyncError::ExportFailed(e.to_string()))?;

        let mut combined_bloom = kg_bloom::BloomFilter::new(rows.len().max(1) as u64 * 1000, 0.01);
        let entity_index = self
            .store
            .load_entity_index(&namespace)
            .await
            .map_err(|e| SyncError::ExportFailed(e.to_string()))?;
        let mut per_chunk_bloom: std::collections::HashMap<String, kg_bloom::BloomFilter> = std::collections::HashMap::new();
        for entry in entity_index.values() {
            combined_bloom.add(entry.entity_id.as_bytes());
            per_chunk_bloom
                .entry(entry.file_path.clone())
                .or_insert_with(|| kg_bloom::BloomFilter::new(1000, 0.01))
                .add(entry.entity_id.as_bytes());
        }

        let chunks = rows
            .into_iter()
            .map(|row| {
                let bloom = per_chunk_bloom
                    .remove(&row.path)
                    .unwrap_or_else(|| kg_bloom::BloomFilter::new(1, 0.01))
                    .serialize();
                crate::types::R2ChunkEntry {
                    id: row.path.clone(),
                    path: row.path,
                    triple_count: row.entity_count,
                    min_time: 0,
                    max_time: 0,
                    bytes: 0,
                    bloom,
                }
            })
            .collect();
        Ok(R2Manifest {
            namespace,
            version: now_version(),
            chunks,
            combined_bloom: combined_bloom.serialize(),
            created_at: now_millis(),
        })
    }

    async fn commit_version(&self, version: String) {
        let mut status = self.status.lock().await;
        status.last_sync_time = Some(now_millis());
        status.cached_r2_version = Some(version);
    }

    /// Serializes all sync operations against this manifest so at most one
    /// runs at a time; others simply await the lock (§5, §4.8).
    async fn with_sync_lock<F, Fut>(&self, op: F) -> SyncResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<SyncResult, SyncError>>,
    {
        let _guard = {
            let mut status = self.status.lock().await;
            status.sync_in_progress = true;
            status
        };
        let result = op().await;
        {
            let mut status = self.status.lock().await;
            status.sync_in_progress = false;
        }
        match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "manifest sync failed");
                SyncResult::failed(SyncDirection::None, &e)
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Manifest versions are opaque strings (§9 open question); this
/// implementation uses a millisecond timestamp, which is monotone for a
/// single writer and sufficient to satisfy "any change produces a new
/// version".
fn now_version() -> String {
    now_millis().to_string()
}
