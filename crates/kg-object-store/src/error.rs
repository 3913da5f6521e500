#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: Box<ObjectStoreError> },
}

impl ObjectStoreError {
    /// Per §7: all I/O errors are retryable by default; nothing in this
    /// taxonomy is classified permanent.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ObjectStoreError::InvalidRange(_) | ObjectStoreError::RetryExhausted { .. })
    }
}
