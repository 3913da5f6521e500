//! Batched triple writer (C5): buffer triples, flush to one GraphCol chunk
//! per batch, tracked by a per-chunk bloom plus a running combined bloom.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kg_bloom::BloomFilter;
use kg_graphcol::GraphColVersion;
use kg_model::{Namespace, Triple};
use kg_object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub max_pending_batches: Option<usize>,
    pub bloom_capacity: u64,
    pub bloom_fpr: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            batch_size: 10_000,
            max_pending_batches: None,
            bloom_capacity: 100_000,
            bloom_fpr: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub id: String,
    pub path: String,
    pub triple_count: u32,
    pub min_time: u64,
    pub max_time: u64,
    pub bytes: u64,
    pub bloom: kg_bloom::SerializedBloom,
}

/// Snapshottable writer state, per §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterState {
    pub triples_written: u64,
    pub chunks_uploaded: u64,
    pub bytes_uploaded: u64,
    pub chunk_infos: Vec<ChunkInfo>,
    pub bloom_state: kg_bloom::SerializedBloom,
}

pub struct BatchedTripleWriter<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    namespace: Namespace,
    config: WriterConfig,
    buffer: Vec<Triple>,
    combined_bloom: BloomFilter,
    chunk_infos: Vec<ChunkInfo>,
    triples_written: u64,
    chunks_uploaded: u64,
    bytes_uploaded: u64,
    pending_flushes: Arc<AtomicUsize>,
}

impl<S: ObjectStore + ?Sized> BatchedTripleWriter<S> {
    pub fn new(store: Arc<S>, namespace: Namespace, config: WriterConfig) -> Self {
        let combined_bloom = BloomFilter::new(config.bloom_capacity, config.bloom_fpr);
        BatchedTripleWriter {
            store,
            namespace,
            config,
            buffer: Vec::new(),
            combined_bloom,
            chunk_infos: Vec::new(),
            triples_written: 0,
            chunks_uploaded: 0,
            bytes_uploaded: 0,
            pending_flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn restore(store: Arc<S>, namespace: Namespace, config: WriterConfig, state: WriterState) -> Result<Self, IngestError> {
        let combined_bloom =
            BloomFilter::deserialize(&state.bloom_state).map_err(|e| IngestError::InvalidCheckpoint(e.to_string()))?;
        Ok(BatchedTripleWriter {
            store,
            namespace,
            config,
            buffer: Vec::new(),
            combined_bloom,
            chunk_infos: state.chunk_infos,
            triples_written: state.triples_written,
            chunks_uploaded: state.chunks_uploaded,
            bytes_uploaded: state.bytes_uploaded,
            pending_flushes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn state(&self) -> WriterState {
        WriterState {
            triples_written: self.triples_written,
            chunks_uploaded: self.chunks_uploaded,
            bytes_uploaded: self.bytes_uploaded,
            chunk_infos: self.chunk_infos.clone(),
            bloom_state: self.combined_bloom.serialize(),
        }
    }

    pub fn is_backpressured(&self) -> bool {
        match self.config.max_pending_batches {
            Some(max) => self.pending_flushes.load(Ordering::Acquire) >= max,
            None => false,
        }
    }

    /// Append triples to the in-memory buffer (no I/O); auto-flushes once
    /// the buffer reaches `batch_size`.
    pub async fn write(&mut self, triples: impl IntoIterator<Item = Triple>) -> Result<(), IngestError> {
        self.buffer.extend(triples);
        while self.buffer.len() >= self.config.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Encode the buffer into one chunk and upload it. A no-op (returns
    /// `Ok(None)`) when the buffer is empty.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn flush(&mut self) -> Result<Option<ChunkInfo>, IngestError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        self.pending_flushes.fetch_add(1, Ordering::AcqRel);
        let result = self.flush_inner().await;
        self.pending_flushes.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn flush_inner(&mut self) -> Result<Option<ChunkInfo>, IngestError> {
        let batch = std::mem::take(&mut self.buffer);
        let min_time = batch.iter().map(|t| t.timestamp).min().unwrap_or(0);
        let max_time = batch.iter().map(|t| t.timestamp).max().unwrap_or(0);
        let triple_count = batch.len() as u32;

        let chunk_bytes = kg_graphcol::encode(&batch, GraphColVersion::V2);
        let bytes_len = chunk_bytes.len() as u64;

        let mut chunk_bloom = BloomFilter::new(self.config.bloom_capacity.max(triple_count as u64), self.config.bloom_fpr);
        for triple in &batch {
            chunk_bloom.add(triple.subject.as_str().as_bytes());
            self.combined_bloom.add(triple.subject.as_str().as_bytes());
        }

        let chunk_id = uuid::Uuid::new_v4().to_string();
        let path_prefix = kg_model::path_transform(self.namespace.as_str());
        let object_key = format!("{path_prefix}/_chunks/{chunk_id}.gcol");

        if let Err(e) = self
            .store
            .put(&object_key, bytes::Bytes::from(chunk_bytes), Some("application/x-graphcol".to_string()))
            .await
        {
            // Upload failed: put the batch back so the next flush retries
            // the same data instead of silently dropping it (§4.5).
            self.buffer = batch;
            return Err(IngestError::StorageWrite(e.to_string()));
        }

        let info = ChunkInfo {
            id: chunk_id,
            path: object_key,
            triple_count,
            min_time,
            max_time,
            bytes: bytes_len,
            bloom: chunk_bloom.serialize(),
        };
        self.chunk_infos.push(info.clone());
        self.triples_written += triple_count as u64;
        self.chunks_uploaded += 1;
        self.bytes_uploaded += bytes_len;

        Ok(Some(info))
    }

    /// Flush whatever remains, regardless of size; idempotent, and safe to
    /// call on an empty writer (returns zero totals).
    pub async fn finalize(&mut self) -> Result<WriterTotals, IngestError> {
        self.flush().await?;
        Ok(WriterTotals {
            triples_written: self.triples_written,
            chunks_uploaded: self.chunks_uploaded,
            bytes_uploaded: self.bytes_uploaded,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriterTotals {
    pub triples_written: u64,
    pub chunks_uploaded: u64,
    pub bytes_uploaded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_model::{TxId, TypedObject};
    use kg_object_store::InMemoryObjectStore;

    fn triple(i: u64) -> Triple {
        Triple {
            subject: format!("https://example.com/entity/{i}").parse().unwrap(),
            predicate: "name".parse().unwrap(),
            object: TypedObject::String(format!("Entity {i}")),
            timestamp: i,
            tx_id: TxId::from_parts(i, 0),
        }
    }

    #[tokio::test]
    async fn flush_uploads_one_chunk_and_clears_buffer() {
        let store = Arc::new(InMemoryObjectStore::new());
        let ns: Namespace = kg_model::namespace_of(&"https://example.com/entity/0".parse().unwrap());
        let mut writer = BatchedTripleWriter::new(store, ns, WriterConfig::default());

        writer.write((0..10).map(triple)).await.unwrap();
        let info = writer.flush().await.unwrap().unwrap();
        assert_eq!(info.triple_count, 10);
        assert_eq!(writer.state().triples_written, 10);
        assert!(writer.flush().await.unwrap().is_none()); // buffer now empty
    }

    #[tokio::test]
    async fn auto_flushes_at_batch_size() {
        let store = Arc::new(InMemoryObjectStore::new());
        let ns: Namespace = kg_model::namespace_of(&"https://example.com/entity/0".parse().unwrap());
        let mut writer = BatchedTripleWriter::new(store, ns, WriterConfig { batch_size: 3, ..Default::default() });

        writer.write((0..7).map(triple)).await.unwrap();
        assert_eq!(writer.state().chunks_uploaded, 2); // two full batches auto-flushed
        let totals = writer.finalize().await.unwrap();
        assert_eq!(totals.triples_written, 7);
        assert_eq!(totals.chunks_uploaded, 3);
    }

    #[tokio::test]
    async fn finalize_on_empty_writer_returns_zero_totals() {
        let store = Arc::new(InMemoryObjectStore::new());
        let ns: Namespace = kg_model::namespace_of(&"https://example.com/entity/0".parse().unwrap());
        let mut writer = BatchedTripleWriter::new(store, ns, WriterConfig::default());
        let totals = writer.finalize().await.unwrap();
        assert_eq!(totals.triples_written, 0);
        assert_eq!(totals.chunks_uploaded, 0);
    }

    /// An `ObjectStore` whose first `put` fails, then succeeds, to exercise
    /// the retry path.
    struct FlakyOnceStore {
        inner: InMemoryObjectStore,
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ObjectStore for FlakyOnceStore {
        async fn get(
            &self,
            key: &str,
            range: Option<kg_object_store::ByteRange>,
        ) -> Result<Option<(kg_object_store::ObjectMetadata, bytes::Bytes)>, kg_object_store::ObjectStoreError> {
            self.inner.get(key, range).await
        }

        async fn put(&self, key: &str, bytes: bytes::Bytes, content_type: Option<String>) -> Result<(), kg_object_store::ObjectStoreError> {
            if !self.failed_once.swap(true, Ordering::AcqRel) {
                return Err(kg_object_store::ObjectStoreError::NetworkTimeout("simulated".into()));
            }
            self.inner.put(key, bytes, content_type).await
        }

        async fn delete(&self, key: &str) -> Result<(), kg_object_store::ObjectStoreError> {
            self.inner.delete(key).await
        }

        async fn list(
            &self,
            prefix: &str,
            limit: Option<usize>,
            cursor: Option<String>,
        ) -> Result<kg_object_store::ListResult, kg_object_store::ObjectStoreError> {
            self.inner.list(prefix, limit, cursor).await
        }
    }

    #[tokio::test]
    async fn failed_upload_retains_buffer_for_retry() {
        let store = Arc::new(FlakyOnceStore {
            inner: InMemoryObjectStore::new(),
            failed_once: std::sync::atomic::AtomicBool::new(false),
        });
        let ns: Namespace = kg_model::namespace_of(&"https://example.com/entity/0".parse().unwrap());
        let mut writer = BatchedTripleWriter::new(store, ns, WriterConfig::default());

        writer.write((0..5).map(triple)).await.unwrap();
        assert!(writer.flush().await.is_err());
        // The buffer is still intact: the same data uploads on the retry.
        let info = writer.flush().await.unwrap().unwrap();
        assert_eq!(info.triple_count, 5);
        assert_eq!(writer.state().triples_written, 5);
    }
}
