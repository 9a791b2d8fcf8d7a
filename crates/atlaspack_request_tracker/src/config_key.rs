use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::options::hash_option_value;

pub type ConfigKeyHasherRef = Arc<dyn ConfigKeyHasher + Send + Sync>;

/// Computes the content hash of a single key within a config file.
///
/// Requests that only read one key of a large config file (e.g. a `package.json` field)
/// register a config key invalidation, and are only rerun when the hash of that key
/// changes rather than on every update of the file.
#[mockall::automock]
pub trait ConfigKeyHasher {
  /// `file_path` is relative to the project root
  fn content_hash(&self, file_path: &Path, config_key: &str) -> anyhow::Result<String>;
}

/// Hashes top-level keys of JSON config files
#[derive(Debug)]
pub struct JsonConfigKeyHasher {
  project_root: PathBuf,
}

impl JsonConfigKeyHasher {
  pub fn new(project_root: PathBuf) -> Self {
    Self { project_root }
  }
}

impl ConfigKeyHasher for JsonConfigKeyHasher {
  fn content_hash(&self, file_path: &Path, config_key: &str) -> anyhow::Result<String> {
    let path = self.project_root.join(file_path);
    let contents = std::fs::read_to_string(&path)
      .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: serde_json::Value = serde_json::from_str(&contents)
      .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    let value = config.get(config_key).unwrap_or(&serde_json::Value::Null);

    Ok(hash_option_value(value))
  }
}
