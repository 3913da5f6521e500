//! Import driver: composes the line reader (C3), the batched triple writer
//! (C5), and checkpointing (C6) into a resumable ingest loop.

use std::sync::Arc;

use kg_durable_kv::DurableKv;
use kg_line_reader::{LineReader, LineReaderConfig};
use kg_model::{Namespace, Triple};
use kg_object_store::ObjectStore;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::IngestError;
use crate::writer::{BatchedTripleWriter, WriterConfig, WriterState, WriterTotals};

pub struct ImportDriverConfig {
    pub job_id: String,
    pub source_url: String,
    pub checkpoint_every_lines: u64,
    pub writer: WriterConfig,
}

/// Drives one resumable import job: feed byte chunks in, get lines out of
/// the line reader, turn each line into triples via `parse_line`, and write
/// them through the batched writer, checkpointing periodically.
pub struct ImportDriver<O: ObjectStore + ?Sized, K: DurableKv + ?Sized> {
    config: ImportDriverConfig,
    line_reader: LineReader,
    writer: BatchedTripleWriter<O>,
    checkpoints: CheckpointManager<K>,
    byte_offset: u64,
    lines_processed: u64,
}

impl<O: ObjectStore + ?Sized, K: DurableKv + ?Sized> ImportDriver<O, K> {
    pub fn new(config: ImportDriverConfig, store: Arc<O>, namespace: Namespace, kv: Arc<K>) -> Self {
        let writer_config = config.writer.clone();
        ImportDriver {
            line_reader: LineReader::new(LineReaderConfig::default()),
            writer: BatchedTripleWriter::new(store, namespace, writer_config),
            checkpoints: CheckpointManager::new(kv),
            byte_offset: 0,
            lines_processed: 0,
            config,
        }
    }

    /// Resume from a previously-saved checkpoint, if one exists.
    pub async fn resume(config: ImportDriverConfig, store: Arc<O>, namespace: Namespace, kv: Arc<K>) -> Result<Self, IngestError> {
        let checkpoints = CheckpointManager::new(kv.clone());
        match checkpoints.load(&config.job_id).await? {
            None => Ok(Self::new(config, store, namespace, kv)),
            Some(checkpoint) => {
                let mut line_reader = LineReader::new(LineReaderConfig::default());
                line_reader.restore_state(checkpoint.line_reader_state);
                let writer = BatchedTripleWriter::restore(
                    store,
                    namespace,
                    config.writer.clone(),
                    checkpoint.batch_writer_state,
                )?;
                Ok(ImportDriver {
                    line_reader,
                    writer,
                    checkpoints: CheckpointManager::new(kv),
                    byte_offset: checkpoint.byte_offset,
                    lines_processed: checkpoint.lines_processed,
                    config,
                })
            }
        }
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// The writer's current snapshottable state, e.g. for building a
    /// manifest from the chunks written so far without a separate sync step.
    pub fn writer_state(&self) -> WriterState {
        self.writer.state()
    }

    /// Feed one byte chunk through the line reader and parser, writing any
    /// resulting triples; checkpoints every `checkpoint_every_lines` lines.
    pub async fn process_chunk(&mut self, chunk: &[u8], parse_line: impl Fn(&str) -> Vec<Triple>) -> Result<(), IngestError> {
        self.byte_offset += chunk.len() as u64;
        let lines = self.line_reader.process_chunk(chunk);
        self.ingest_lines(lines, parse_line).await
    }

    pub async fn flush_remaining_lines(&mut self, parse_line: impl Fn(&str) -> Vec<Triple>) -> Result<(), IngestError> {
        let lines = self.line_reader.flush().into_iter().collect::<Vec<_>>();
        self.ingest_lines(lines, parse_line).await
    }

    async fn ingest_lines(&mut self, lines: Vec<String>, parse_line: impl Fn(&str) -> Vec<Triple>) -> Result<(), IngestError> {
        for line in lines {
            let triples = parse_line(&line);
            self.writer.write(triples).await?;
            self.lines_processed += 1;
            if self.lines_processed % self.config.checkpoint_every_lines == 0 {
                self.checkpoint().await?;
            }
        }
        Ok(())
    }

    pub async fn checkpoint(&self) -> Result<(), IngestError> {
        self.checkpoints
            .save(Checkpoint {
                job_id: self.config.job_id.clone(),
                source_url: self.config.source_url.clone(),
                byte_offset: self.byte_offset,
                total_bytes: None,
                lines_processed: self.lines_processed,
                triples_written: self.writer.state().triples_written,
                line_reader_state: self.line_reader.state().clone(),
                batch_writer_state: self.writer.state(),
                checkpointed_at: 0,
                metadata: None,
            })
            .await
    }

    /// Flush the writer and delete the checkpoint; idempotent.
    pub async fn finalize(&mut self) -> Result<WriterTotals, IngestError> {
        let totals = self.writer.finalize().await?;
        self.checkpoints.delete(&self.config.job_id).await?;
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_durable_kv::InMemoryDurableKv;
    use kg_model::{TxId, TypedObject};
    use kg_object_store::InMemoryObjectStore;

    fn parse_test_line(line: &str) -> Vec<Triple> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return Vec::new();
        };
        let id = value["id"].as_u64().unwrap();
        let data = value["data"].as_str().unwrap().to_string();
        vec![Triple {
            subject: format!("https://example.com/row/{id}").parse().unwrap(),
            predicate: "data".parse().unwrap(),
            object: TypedObject::String(data),
            timestamp: id,
            tx_id: TxId::from_parts(id, 0),
        }]
    }

    fn make_lines(n: u64) -> String {
        (0..n)
            .map(|i| format!(r#"{{"id": {i}, "data": "test"}}"#))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n"
    }

    #[tokio::test]
    async fn import_resume_processes_all_lines_across_a_restart() {
        let store = Arc::new(InMemoryObjectStore::new());
        let kv = Arc::new(InMemoryDurableKv::new());
        let namespace = kg_model::namespace_of(&"https://example.com/row/0".parse().unwrap());
        let source = make_lines(1000);
        let midpoint = source.len() / 2;
        // Land the split on a line boundary near the midpoint.
        let split = source[..midpoint].rfind('\n').map(|i| i + 1).unwrap_or(midpoint);

        let config = ImportDriverConfig {
            job_id: "job1".to_string(),
            source_url: "https://example.com/data.jsonl".to_string(),
            checkpoint_every_lines: 500,
            writer: WriterConfig { batch_size: 10_000, ..Default::default() },
        };
        let mut driver = ImportDriver::new(config, store.clone(), namespace.clone(), kv.clone());
        driver.process_chunk(source[..split].as_bytes(), parse_test_line).await.unwrap();
        driver.checkpoint().await.unwrap();

        let config2 = ImportDriverConfig {
            job_id: "job1".to_string(),
            source_url: "https://example.com/data.jsonl".to_string(),
            checkpoint_every_lines: 500,
            writer: WriterConfig { batch_size: 10_000, ..Default::default() },
        };
        let mut resumed = ImportDriver::resume(config2, store, namespace, kv).await.unwrap();
        resumed.process_chunk(source[split..].as_bytes(), parse_test_line).await.unwrap();
        let totals = resumed.finalize().await.unwrap();
        assert_eq!(totals.triples_written, 1000);
    }
}
