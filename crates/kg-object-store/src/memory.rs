use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::ObjectStoreError;
use crate::store::ObjectStore;
use crate::types::{ByteRange, ListResult, ObjectMetadata};

struct Entry {
    bytes: Bytes,
    content_type: Option<String>,
}

/// Reference `ObjectStore` implementation backed by an in-process map, with
/// real byte-range semantics (§6, C4). Used as the network-free test double
/// for every other crate's test suite (SPEC_FULL §C.1).
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Entry>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<(ObjectMetadata, Bytes)>, ObjectStoreError> {
        let objects = self.objects.lock().unwrap();
        let Some(entry) = objects.get(key) else {
            return Ok(None);
        };
        let size = entry.bytes.len() as u64;

        let sliced = match range {
            None => entry.bytes.clone(),
            Some(ByteRange::Suffix(n)) => {
                let start = size.saturating_sub(n) as usize;
                entry.bytes.slice(start..)
            }
            Some(ByteRange::Offset { offset, length }) => {
                if offset >= size {
                    return Ok(Some((
                        ObjectMetadata {
                            content_type: entry.content_type.clone(),
                            size,
                        },
                        Bytes::new(),
                    )));
                }
                let end = match length {
                    Some(len) => (offset + len).min(size),
                    None => size,
                };
                entry.bytes.slice(offset as usize..end as usize)
            }
        };

        Ok(Some((
            ObjectMetadata {
                content_type: entry.content_type.clone(),
                size,
            },
            sliced,
        )))
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: Option<String>) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().insert(key.to_string(), Entry { bytes, content_type });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<ListResult, ObjectStoreError> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<&String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| cursor.as_ref().map_or(true, |c| k.as_str() > c.as_str()))
            .collect();
        keys.sort();

        let limit = limit.unwrap_or(usize::MAX);
        let truncated = keys.len() > limit;
        keys.truncate(limit);
        let next_cursor = if truncated { keys.last().map(|k| k.to_string()) } else { None };

        Ok(ListResult {
            keys: keys.into_iter().cloned().collect(),
            truncated,
            cursor: next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_full_object() {
        let store = InMemoryObjectStore::new();
        store.put("k", Bytes::from_static(b"hello"), None).await.unwrap();
        let (_, bytes) = store.get("k", None).await.unwrap().unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn honors_offset_range() {
        let store = InMemoryObjectStore::new();
        store.put("k", Bytes::from_static(b"0123456789"), None).await.unwrap();
        let (_, bytes) = store
            .get("k", Some(ByteRange::Offset { offset: 2, length: Some(3) }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(b"234"));
    }

    #[tokio::test]
    async fn honors_suffix_range() {
        let store = InMemoryObjectStore::new();
        store.put("k", Bytes::from_static(b"0123456789"), None).await.unwrap();
        let (_, bytes) = store.get("k", Some(ByteRange::Suffix(3))).await.unwrap().unwrap();
        assert_eq!(bytes, Bytes::from_static(b"789"));
    }

    #[tokio::test]
    async fn list_respects_prefix_and_limit() {
        let store = InMemoryObjectStore::new();
        for k in ["a/1", "a/2", "b/1"] {
            store.put(k, Bytes::new(), None).await.unwrap();
        }
        let result = store.list("a/", Some(1), None).await.unwrap();
        assert_eq!(result.keys, vec!["a/1".to_string()]);
        assert!(result.truncated);
    }
}
