#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("corrupt chunk: {0}")]
    CorruptFormat(String),
    #[error("sql error: {0}")]
    Sql(String),
}

impl From<rusqlite::Error> for ShardError {
    fn from(e: rusqlite::Error) -> Self {
        ShardError::Sql(e.to_string())
    }
}
