use bytes::Bytes;

use crate::error::ObjectStoreError;
use crate::types::{ByteRange, ListResult, ObjectMetadata};

/// The blob store contract consumed by the rest of the data plane (§6): GET
/// with byte-range, PUT, DELETE, LIST. Implementations are free to be local
/// (tests, `kg-cli`'s disk stand-in) or remote (`HttpObjectStore`).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<(ObjectMetadata, Bytes)>, ObjectStoreError>;

    async fn put(&self, key: &str, bytes: Bytes, content_type: Option<String>) -> Result<(), ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<ListResult, ObjectStoreError>;
}
