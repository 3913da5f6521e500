#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}
