use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::StorageResult;
use crate::{BoxFuture, KeyValueStore};

/// In-memory store for tests and the QA runner. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of stored keys; handy for assertions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.entries.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.entries.write().await.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("history-store").await.unwrap(), None);

        store
            .set("history-store", "{\"conversations\":[]}".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get("history-store").await.unwrap().as_deref(),
            Some("{\"conversations\":[]}")
        );

        store.remove("history-store").await.unwrap();
        assert_eq!(store.get("history-store").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn later_writes_replace_earlier_ones() {
        let store = MemoryStore::new();
        store.set("k", "v1".to_string()).await.unwrap();
        store.set("k", "v2".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len().await, 1);
    }
}
