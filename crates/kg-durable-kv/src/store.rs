use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DurableKvError;

/// The shard-local durable key/value contract (§6): `get`, `put`, `delete`,
/// prefix `list`, and batch `put`. Values are opaque bytes at the trait
/// boundary (JSON, here) so the trait itself stays object-safe; typed
/// access is layered on top via `DurableKvExt`.
#[async_trait::async_trait]
pub trait DurableKv: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, DurableKvError>;
    async fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), DurableKvError>;
    async fn delete(&self, key: &str) -> Result<bool, DurableKvError>;
    async fn delete_many(&self, keys: &[String]) -> Result<usize, DurableKvError>;
    async fn list_raw(&self, prefix: Option<&str>) -> Result<Vec<(String, Vec<u8>)>, DurableKvError>;
    async fn put_many_raw(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), DurableKvError>;
}

/// Typed helpers over any `DurableKv`, serializing through JSON. Kept
/// separate from the object-safe trait above because the generic methods
/// here aren't dyn-compatible.
#[async_trait::async_trait]
pub trait DurableKvExt: DurableKv {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DurableKvError> {
        match self.get_raw(key).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| DurableKvError::InvalidData(e.to_string())),
        }
    }

    async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), DurableKvError> {
        let bytes = serde_json::to_vec(value).map_err(|e| DurableKvError::InvalidData(e.to_string()))?;
        self.put_raw(key, bytes).await
    }

    async fn list<T: DeserializeOwned>(&self, prefix: Option<&str>) -> Result<Vec<(String, T)>, DurableKvError> {
        let raw = self.list_raw(prefix).await?;
        raw.into_iter()
            .map(|(k, v)| {
                serde_json::from_slice(&v)
                    .map(|value| (k, value))
                    .map_err(|e| DurableKvError::InvalidData(e.to_string()))
            })
            .collect()
    }
}

impl<K: DurableKv + ?Sized> DurableKvExt for K {}
