use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
  Create,
  Update,
  Delete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
  pub path: PathBuf,
  pub kind: WatchEventType,
}

impl WatchEvent {
  pub fn create(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      kind: WatchEventType::Create,
    }
  }

  pub fn update(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      kind: WatchEventType::Update,
    }
  }

  pub fn delete(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      kind: WatchEventType::Delete,
    }
  }
}

pub type WatchEvents = Vec<WatchEvent>;

pub type WatcherRef = Arc<dyn Watcher + Send + Sync>;

/// The file-system watcher the request graph is kept in sync with.
///
/// Between two builds the watcher is the only source of truth for what changed on disk.
/// A snapshot token is written at the end of a build and handed back on the next start
/// to retrieve every event that happened since.
#[async_trait]
pub trait Watcher {
  /// Events under `watch_dir` since `snapshot` was taken. Paths may be absolute.
  async fn get_events_since(&self, watch_dir: &Path, snapshot: &str) -> anyhow::Result<WatchEvents>;

  /// Take a snapshot of `watch_dir` and return an opaque token describing it
  async fn write_snapshot(&self, watch_dir: &Path) -> anyhow::Result<String>;
}
