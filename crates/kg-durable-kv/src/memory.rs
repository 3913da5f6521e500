use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::DurableKvError;
use crate::store::DurableKv;

#[derive(Default)]
pub struct InMemoryDurableKv {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryDurableKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DurableKv for InMemoryDurableKv {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, DurableKvError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<(), DurableKvError> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DurableKvError> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, DurableKvError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count())
    }

    async fn list_raw(&self, prefix: Option<&str>) -> Result<Vec<(String, Vec<u8>)>, DurableKvError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put_many_raw(&self, new_entries: Vec<(String, Vec<u8>)>) -> Result<(), DurableKvError> {
        let mut entries = self.entries.lock().unwrap();
        for (k, v) in new_entries {
            entries.insert(k, v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DurableKvExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u64,
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let kv = InMemoryDurableKv::new();
        kv.put("checkpoint:job1", &Counter { n: 42 }).await.unwrap();
        let got: Option<Counter> = kv.get("checkpoint:job1").await.unwrap();
        assert_eq!(got, Some(Counter { n: 42 }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let kv = InMemoryDurableKv::new();
        kv.put_raw("a:1", b"1".to_vec()).await.unwrap();
        kv.put_raw("b:1", b"2".to_vec()).await.unwrap();
        let entries = kv.list_raw(Some("a:")).await.unwrap();
        assert_eq!(entries, vec![("a:1".to_string(), b"1".to_vec())]);
    }

    #[tokio::test]
    async fn delete_reports_whether_key_existed() {
        let kv = InMemoryDurableKv::new();
        kv.put_raw("k", b"v".to_vec()).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }
}
