use std::path::PathBuf;

use async_trait::async_trait;

use super::get_file_key;
use super::Cache;

/// A filesystem-only cache implementation.
/// Stores all blobs on the filesystem under `{cache_dir}/{key}`.
#[derive(Debug)]
pub struct FsCache {
  cache_dir: PathBuf,
}

impl FsCache {
  pub fn new(cache_dir: PathBuf) -> Self {
    Self { cache_dir }
  }
}

#[async_trait]
impl Cache for FsCache {
  async fn has_large_blob(&self, key: &str) -> anyhow::Result<bool> {
    let file_path = get_file_key(&self.cache_dir, key);
    Ok(tokio::fs::try_exists(&file_path).await?)
  }

  async fn get_large_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
    let file_path = get_file_key(&self.cache_dir, key);
    Ok(tokio::fs::read(&file_path).await?)
  }

  async fn set_large_blob(&self, key: &str, blob: Vec<u8>) -> anyhow::Result<()> {
    let file_path = get_file_key(&self.cache_dir, key);
    if let Some(parent) = file_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&file_path, blob).await?;
    Ok(())
  }

  async fn delete_large_blob(&self, key: &str) -> anyhow::Result<()> {
    let file_path = get_file_key(&self.cache_dir, key);
    match tokio::fs::remove_file(&file_path).await {
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
      result => Ok(result?),
    }
  }
}
