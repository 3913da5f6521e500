//! `DiskObjectStore`: a local-filesystem stand-in for the blob store,
//! so `kg` can exercise the full ingest -> shard -> lookup path without a
//! network dependency. Byte-range semantics mirror `InMemoryObjectStore`'s
//! exactly (§6, C4).

use std::path::{Path, PathBuf};

use bytes::Bytes;
use kg_object_store::{ByteRange, ListResult, ObjectMetadata, ObjectStore, ObjectStoreError};

pub struct DiskObjectStore {
    root: PathBuf,
}

impl DiskObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskObjectStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait::async_trait]
impl ObjectStore for DiskObjectStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<(ObjectMetadata, Bytes)>, ObjectStoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ObjectStoreError::StorageRead(e.to_string())),
        };
        let size = bytes.len() as u64;

        let sliced = match range {
            None => bytes,
            Some(ByteRange::Suffix(n)) => {
                let start = size.saturating_sub(n) as usize;
                bytes.slice(start..)
            }
            Some(ByteRange::Offset { offset, length }) => {
                if offset >= size {
                    return Ok(Some((ObjectMetadata { content_type: None, size }, Bytes::new())));
                }
                let end = match length {
                    Some(len) => (offset + len).min(size),
                    None => size,
                };
                bytes.slice(offset as usize..end as usize)
            }
        };

        Ok(Some((ObjectMetadata { content_type: None, size }, sliced)))
    }

    async fn put(&self, key: &str, bytes: Bytes, _content_type: Option<String>) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ObjectStoreError::StorageWrite(e.to_string()))?;
        }
        tokio::fs::write(&path, &bytes).await.map_err(|e| ObjectStoreError::StorageWrite(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ObjectStoreError::StorageWrite(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>, cursor: Option<String>) -> Result<ListResult, ObjectStoreError> {
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root))
            .await
            .map_err(|e| ObjectStoreError::StorageRead(e.to_string()))?
            .map_err(|e| ObjectStoreError::StorageRead(e.to_string()))?;

        let mut keys: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| cursor.as_ref().map_or(true, |c| k.as_str() > c.as_str()))
            .collect();
        keys.sort();

        let limit = limit.unwrap_or(usize::MAX);
        let truncated = keys.len() > limit;
        keys.truncate(limit);
        let next_cursor = if truncated { keys.last().cloned() } else { None };

        Ok(ListResult { keys, truncated, cursor: next_cursor })
    }
}

fn walk_keys(root: &Path) -> std::io::Result<Vec<String>> {
    let mut keys = Vec::new();
    if !root.exists() {
        return Ok(keys);
    }
    walk_dir(root, root, &mut keys)?;
    Ok(keys)
}

fn walk_dir(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            if let Some(key) = relative.to_str() {
                keys.push(key.replace(std::path::MAIN_SEPARATOR, "/"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_full_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskObjectStore::new(dir.path());
        store.put("a/k", Bytes::from_static(b"hello"), None).await.unwrap();
        let (_, bytes) = store.get("a/k", None).await.unwrap().unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn honors_offset_and_suffix_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskObjectStore::new(dir.path());
        store.put("k", Bytes::from_static(b"0123456789"), None).await.unwrap();

        let (_, offset) = store.get("k", Some(ByteRange::Offset { offset: 2, length: Some(3) })).await.unwrap().unwrap();
        assert_eq!(offset, Bytes::from_static(b"234"));

        let (_, suffix) = store.get("k", Some(ByteRange::Suffix(3))).await.unwrap().unwrap();
        assert_eq!(suffix, Bytes::from_static(b"789"));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskObjectStore::new(dir.path());
        assert!(store.get("absent", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_respects_prefix_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskObjectStore::new(dir.path());
        for k in ["a/1", "a/2", "b/1"] {
            store.put(k, Bytes::new(), None).await.unwrap();
        }
        let result = store.list("a/", Some(1), None).await.unwrap();
        assert_eq!(result.keys, vec!["a/1".to_string()]);
        assert!(result.truncated);
    }
}
