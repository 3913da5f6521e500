#[derive(Debug, thiserror::Error)]
pub enum GraphColError {
    #[error("corrupt GraphCol format: {0}")]
    CorruptFormat(String),
    #[error("unsupported GraphCol version: {0}")]
    UnsupportedVersion(u32),
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
}
