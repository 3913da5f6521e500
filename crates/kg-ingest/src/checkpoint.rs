//! Resumable import checkpoint manager (C6): save/load/validate import
//! progress in a durable KV under the `checkpoint:` prefix.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use kg_durable_kv::{DurableKv, DurableKvExt};
use kg_line_reader::LineReaderState;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::writer::WriterState;

const PREFIX: &str = "checkpoint:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub source_url: String,
    pub byte_offset: u64,
    pub total_bytes: Option<u64>,
    pub lines_processed: u64,
    pub triples_written: u64,
    pub line_reader_state: LineReaderState,
    pub batch_writer_state: WriterState,
    pub checkpointed_at: u64,
    pub metadata: Option<serde_json::Value>,
}

pub struct CheckpointManager<K: DurableKv + ?Sized> {
    kv: Arc<K>,
}

impl<K: DurableKv + ?Sized> CheckpointManager<K> {
    pub fn new(kv: Arc<K>) -> Self {
        CheckpointManager { kv }
    }

    fn key(job_id: &str) -> String {
        format!("{PREFIX}{job_id}")
    }

    /// Stamps `checkpointed_at` to now and persists.
    pub async fn save(&self, mut checkpoint: Checkpoint) -> Result<(), IngestError> {
        checkpoint.checkpointed_at = now_millis();
        self.kv
            .put(&Self::key(&checkpoint.job_id), &checkpoint)
            .await
            .map_err(|e| IngestError::StorageWrite(e.to_string()))
    }

    /// Reads and validates a stored checkpoint. Malformed stored data (a
    /// missing required field, or a structurally broken nested state) never
    /// surfaces as an error — the job simply restarts clean (§4.6, §7).
    pub async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, IngestError> {
        match self.kv.get_raw(&Self::key(job_id)).await {
            Ok(Some(bytes)) => Ok(serde_json::from_slice::<Checkpoint>(&bytes).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(IngestError::StorageRead(e.to_string())),
        }
    }

    /// Read-modify-write; a no-op if the job has no stored checkpoint.
    pub async fn update(&self, job_id: &str, f: impl FnOnce(&mut Checkpoint)) -> Result<(), IngestError> {
        if let Some(mut checkpoint) = self.load(job_id).await? {
            f(&mut checkpoint);
            self.save(checkpoint).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), IngestError> {
        self.kv
            .delete(&Self::key(job_id))
            .await
            .map(|_| ())
            .map_err(|e| IngestError::StorageWrite(e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<String>, IngestError> {
        let raw = self
            .kv
            .list_raw(Some(PREFIX))
            .await
            .map_err(|e| IngestError::StorageRead(e.to_string()))?;
        Ok(raw.into_iter().map(|(k, _)| k[PREFIX.len()..].to_string()).collect())
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_durable_kv::InMemoryDurableKv;

    fn sample(job_id: &str) -> Checkpoint {
        Checkpoint {
            job_id: job_id.to_string(),
            source_url: "https://example.com/data.jsonl".to_string(),
            byte_offset: 0,
            total_bytes: None,
            lines_processed: 0,
            triples_written: 0,
            line_reader_state: LineReaderState {
                bytes_processed: 0,
                lines_emitted: 0,
                partial_line: Vec::new(),
            },
            batch_writer_state: WriterState {
                triples_written: 0,
                chunks_uploaded: 0,
                bytes_uploaded: 0,
                chunk_infos: Vec::new(),
                bloom_state: kg_bloom::BloomFilter::new(100, 0.01).serialize(),
            },
            checkpointed_at: 0,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let manager = CheckpointManager::new(kv);
        manager.save(sample("job1")).await.unwrap();
        let loaded = manager.load("job1").await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job1");
        assert!(loaded.checkpointed_at > 0);
    }

    #[tokio::test]
    async fn load_missing_checkpoint_returns_none() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let manager = CheckpointManager::new(kv);
        assert!(manager.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_rejects_checkpoint_missing_a_required_field() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let mut partial = serde_json::to_value(sample("job1")).unwrap();
        partial.as_object_mut().unwrap().remove("lines_processed");
        kv.put_raw("checkpoint:job1", serde_json::to_vec(&partial).unwrap()).await.unwrap();

        let manager = CheckpointManager::new(kv);
        assert!(manager.load("job1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_rejects_checkpoint_with_broken_nested_state() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let mut partial = serde_json::to_value(sample("job1")).unwrap();
        partial["line_reader_state"] = serde_json::json!("not-an-object");
        kv.put_raw("checkpoint:job1", serde_json::to_vec(&partial).unwrap()).await.unwrap();

        let manager = CheckpointManager::new(kv);
        assert!(manager.load("job1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_is_noop_when_checkpoint_absent() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let manager = CheckpointManager::new(kv);
        manager.update("absent", |c| c.lines_processed += 1).await.unwrap();
        assert!(manager.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_job_ids_via_prefix_scan() {
        let kv = Arc::new(InMemoryDurableKv::new());
        let manager = CheckpointManager::new(kv);
        manager.save(sample("job1")).await.unwrap();
        manager.save(sample("job2")).await.unwrap();
        let mut ids = manager.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["job1".to_string(), "job2".to_string()]);
    }
}
