//! Local cache held in process memory

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::loading::{LoadError, LoadResult, LocalCache};

#[derive(Debug, Default)]
pub struct InMemoryLocalCache {
    entries: RwLock<HashMap<String, String>>,
    fail_writes: RwLock<bool>,
}

impl InMemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `set` fail, as a full or read-only device would
    pub async fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl LocalCache for InMemoryLocalCache {
    async fn get(&self, key: &str) -> LoadResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> LoadResult<()> {
        if *self.fail_writes.read().await {
            return Err(LoadError::Cache(format!("write to {key} rejected")));
        }
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> LoadResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
