use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

pub use self::fs_cache::*;
pub use self::in_memory::*;

mod fs_cache;
mod in_memory;

pub type CacheRef = Arc<dyn Cache + Send + Sync>;

/// The blob store the request graph and large request results are persisted to
#[async_trait]
pub trait Cache {
  async fn has_large_blob(&self, key: &str) -> anyhow::Result<bool>;

  async fn get_large_blob(&self, key: &str) -> anyhow::Result<Vec<u8>>;

  async fn set_large_blob(&self, key: &str, blob: Vec<u8>) -> anyhow::Result<()>;

  /// Deleting a key that doesn't exist is not an error
  async fn delete_large_blob(&self, key: &str) -> anyhow::Result<()>;
}

/// Convert a cache key to a safe filesystem path.
/// Sanitizes `..` in path segments to avoid directory traversal.
pub fn get_file_key(cache_dir: &Path, key: &str) -> PathBuf {
  let clean_key = key
    .split('/')
    .map(|part| {
      if part == ".." {
        "$$__parent_dir$$"
      } else {
        part
      }
    })
    .collect::<Vec<_>>()
    .join("/");
  cache_dir.join(clean_key)
}
