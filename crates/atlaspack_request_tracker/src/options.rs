use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::hash::hash_string;

pub type EnvMap = BTreeMap<String, String>;

/// Configuration of a [`crate::RequestTracker`]
///
/// Everything has a default, so a driver only needs to provide what it cares about:
///
/// ```
/// use atlaspack_request_tracker::RequestTrackerOptions;
///
/// let options: RequestTrackerOptions =
///   serde_json::from_str(r#"{"projectRoot": "/app", "entries": ["src/index.js"]}"#).unwrap();
///
/// assert_eq!(options.nodes_per_blob, 16384);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestTrackerOptions {
  /// Every tracked file path is stored relative to this directory
  pub project_root: PathBuf,

  pub entries: Vec<String>,

  pub mode: BuildMode,

  /// Environment variables visible to requests through `invalidate_on_env_change`
  pub env: EnvMap,

  /// Option values requests can depend on through `invalidate_on_option_change`.
  ///
  /// Nested values are addressed with dotted names, e.g. `defaultTargetOptions.sourceMaps`.
  pub build_options: serde_json::Value,

  pub should_disable_cache: bool,

  /// Number of graph nodes written per cache blob
  pub nodes_per_blob: usize,

  /// Time budget for replaying watcher events on start-up
  pub invalidation_threshold_ms: u64,

  /// Serialized results larger than this many bytes are stored as their own cache entry
  pub large_result_threshold: usize,

  /// Maximum number of cache writes in flight while persisting the graph
  pub max_concurrent_writes: usize,

  /// Mixed into the cache key so that graphs written by other versions are never read
  pub cache_version: String,
}

impl Default for RequestTrackerOptions {
  fn default() -> Self {
    Self {
      project_root: PathBuf::default(),
      entries: Vec::new(),
      mode: BuildMode::default(),
      env: EnvMap::new(),
      build_options: serde_json::Value::Object(Default::default()),
      should_disable_cache: false,
      nodes_per_blob: 2usize.pow(14),
      invalidation_threshold_ms: 10_000,
      large_result_threshold: 64 * 1024,
      max_concurrent_writes: 32,
      cache_version: String::from(env!("CARGO_PKG_VERSION")),
    }
  }
}

impl RequestTrackerOptions {
  /// The build options hash all persisted keys are derived from
  pub fn cache_key(&self) -> String {
    let entries = serde_json::to_string(&self.entries).unwrap_or_default();
    hash_string(format!("{}:{}:{}", self.cache_version, entries, self.mode))
  }

  pub fn invalidation_threshold(&self) -> Duration {
    Duration::from_millis(self.invalidation_threshold_ms)
  }

  /// Look up a build option by its dotted name. Missing options are `null`.
  pub fn option_value(&self, name: &str) -> &serde_json::Value {
    option_value(&self.build_options, name)
  }
}

pub(crate) fn option_value<'a>(options: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
  name
    .split('.')
    .try_fold(options, |value, key| value.get(key))
    .unwrap_or(&serde_json::Value::Null)
}

/// Hash stored on option nodes to detect changes between builds
pub(crate) fn hash_option_value(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(value) => hash_string(value),
    value => hash_string(value.to_string()),
  }
}

#[derive(Clone, Debug, Default, Hash, PartialEq)]
pub enum BuildMode {
  #[default]
  Development,
  Production,
  Other(String),
}

impl Display for BuildMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BuildMode::Development => write!(f, "development"),
      BuildMode::Production => write!(f, "production"),
      BuildMode::Other(mode) => write!(f, "{}", mode.to_lowercase()),
    }
  }
}

impl Serialize for BuildMode {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for BuildMode {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;

    Ok(match s.as_str() {
      "development" => BuildMode::Development,
      "production" => BuildMode::Production,
      _ => BuildMode::Other(s),
    })
  }
}
