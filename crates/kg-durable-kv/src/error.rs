#[derive(Debug, thiserror::Error)]
pub enum DurableKvError {
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}
