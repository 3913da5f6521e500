use bytes::Bytes;

/// A byte-range request, per HTTP/1.1 Range semantics (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=offset-` or `bytes=offset-(offset+length-1)`.
    Offset { offset: u64, length: Option<u64> },
    /// `bytes=-N`: the last `N` bytes of the object.
    Suffix(u64),
}

impl ByteRange {
    pub fn to_header_value(self) -> String {
        match self {
            ByteRange::Offset { offset, length: Some(len) } => {
                format!("bytes={}-{}", offset, offset + len.saturating_sub(1))
            }
            ByteRange::Offset { offset, length: None } => format!("bytes={offset}-"),
            ByteRange::Suffix(n) => format!("bytes=-{n}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub keys: Vec<String>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// Result of a single range fetch (§4.4).
#[derive(Debug, Clone)]
pub struct RangeResult {
    pub data: Bytes,
    pub start: u64,
    pub end: u64,
    pub total_size: Option<u64>,
    pub is_last: bool,
}
