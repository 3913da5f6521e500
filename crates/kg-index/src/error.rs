#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("sql error: {0}")]
    Sql(String),
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Sql(e.to_string())
    }
}
