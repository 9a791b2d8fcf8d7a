use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Cache;

/// Cache kept in process memory, used by tests and embedders that don't persist builds
#[derive(Clone, Default)]
pub struct InMemoryCache {
  store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryCache {
  pub async fn keys(&self) -> Vec<String> {
    let mut keys = self.store.read().await.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
  }
}

#[async_trait]
impl Cache for InMemoryCache {
  async fn has_large_blob(&self, key: &str) -> anyhow::Result<bool> {
    Ok(self.store.read().await.contains_key(key))
  }

  async fn get_large_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
    self
      .store
      .read()
      .await
      .get(key)
      .cloned()
      .ok_or_else(|| anyhow!("Cache entry {key} does not exist"))
  }

  async fn set_large_blob(&self, key: &str, blob: Vec<u8>) -> anyhow::Result<()> {
    self.store.write().await.insert(key.to_string(), blob);
    Ok(())
  }

  async fn delete_large_blob(&self, key: &str) -> anyhow::Result<()> {
    self.store.write().await.remove(key);
    Ok(())
  }
}
