//! `reqwest`-based `ObjectStore` over a plain HTTP origin exposing range
//! GET / PUT / DELETE (e.g. an R2/S3-compatible bucket behind a gateway).
//! LIST is intentionally not part of this contract: the spec's blob-store
//! LIST is consumed through provider-specific APIs this crate doesn't
//! assume, so callers needing it should go through that provider's SDK and
//! only use this type for GET/PUT/DELETE against individual keys.

use bytes::Bytes;
use reqwest::{Client, StatusCode};

use crate::error::ObjectStoreError;
use crate::store::ObjectStore;
use crate::types::{ByteRange, ListResult, ObjectMetadata};

pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpObjectStore {
            client,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpObjectStore {
    #[tracing::instrument(skip(self), fields(key))]
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<(ObjectMetadata, Bytes)>, ObjectStoreError> {
        let mut request = self.client.get(self.url_for(key));
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.to_header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::NetworkTimeout(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Some((
                ObjectMetadata { content_type: None, size: 0 },
                Bytes::new(),
            ))),
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let size = parse_total_size(&response).unwrap_or_else(|| response.content_length().unwrap_or(0));
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| ObjectStoreError::StorageRead(e.to_string()))?;
                Ok(Some((ObjectMetadata { content_type, size }, bytes)))
            }
            other => Err(ObjectStoreError::StorageRead(format!("unexpected status {other}"))),
        }
    }

    #[tracing::instrument(skip(self, bytes), fields(key))]
    async fn put(&self, key: &str, bytes: Bytes, content_type: Option<String>) -> Result<(), ObjectStoreError> {
        let mut request = self.client.put(self.url_for(key)).body(bytes);
        if let Some(ct) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, ct);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::NetworkTimeout(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ObjectStoreError::StorageWrite(format!("status {}", response.status())));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let response = self
            .client
            .delete(self.url_for(key))
            .send()
            .await
            .map_err(|e| ObjectStoreError::NetworkTimeout(e.to_string()))?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::StorageWrite(format!("status {}", response.status())));
        }
        Ok(())
    }

    async fn list(
        &self,
        _prefix: &str,
        _limit: Option<usize>,
        _cursor: Option<String>,
    ) -> Result<ListResult, ObjectStoreError> {
        Err(ObjectStoreError::StorageRead(
            "LIST is not implemented by the generic HTTP object store".into(),
        ))
    }
}

/// Parse `total` out of a `Content-Range: bytes start-end/total` header, when
/// the server answered with 206 (200 responses carry no such header, and the
/// caller should fall back to `Content-Length` instead).
fn parse_total_size(response: &reqwest::Response) -> Option<u64> {
    let header = response.headers().get(reqwest::header::CONTENT_RANGE)?.to_str().ok()?;
    header.rsplit('/').next()?.parse().ok()
}
