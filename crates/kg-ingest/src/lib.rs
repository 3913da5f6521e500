//! Ingest pipeline: the batched triple writer (C5), resumable import
//! checkpointing (C6), and the driver composing them with the line reader.

mod checkpoint;
mod driver;
mod error;
mod writer;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use driver::{ImportDriver, ImportDriverConfig};
pub use error::IngestError;
pub use writer::{BatchedTripleWriter, ChunkInfo, WriterConfig, WriterState, WriterTotals};
