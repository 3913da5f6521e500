#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("sql error: {0}")]
    Sql(String),
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<rusqlite::Error> for HnswError {
    fn from(e: rusqlite::Error) -> Self {
        HnswError::Sql(e.to_string())
    }
}

impl From<kg_object_store::ObjectStoreError> for HnswError {
    fn from(e: kg_object_store::ObjectStoreError) -> Self {
        HnswError::StorageRead(e.to_string())
    }
}
