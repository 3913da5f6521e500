#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("storage read failed: {0}")]
    StorageRead(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("cache limit exceeded: {0}")]
    CacheLimitExceeded(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("R2 fetch failed: {0}")]
    R2FetchFailed(String),
    #[error("R2 write failed: {0}")]
    R2WriteFailed(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("import failed: {0}")]
    ImportFailed(String),
    #[error("export failed: {0}")]
    ExportFailed(String),
    #[error("unknown sync error: {0}")]
    Unknown(String),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::R2FetchFailed(_) => "R2FetchFailed",
            SyncError::R2WriteFailed(_) => "R2WriteFailed",
            SyncError::InvalidManifest(_) => "InvalidManifest",
            SyncError::ImportFailed(_) => "ImportFailed",
            SyncError::ExportFailed(_) => "ExportFailed",
            SyncError::Unknown(_) => "Unknown",
        }
    }
}
