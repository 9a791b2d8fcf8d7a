use std::hash::Hash;
use std::hash::Hasher;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cache::Cache;
use crate::cache::CacheRef;
use crate::cache::InMemoryCache;
use crate::config_key::ConfigKeyHasherRef;
use crate::options::RequestTrackerOptions;
use crate::request_graph::ContentKey;
use crate::request_graph::FileCreateInvalidation;
use crate::request_graph::InvalidateReason;
use crate::request_graph::RequestInvalidation;
use crate::request_graph::RequestType;
use crate::request_tracker::Request;
use crate::request_tracker::RequestTracker;
use crate::request_tracker::RequestTrackerInitOptions;
use crate::request_tracker::RunRequestContext;
use crate::request_tracker::RunRequestError;
use crate::watch::WatchEvents;
use crate::watch::Watcher;
use crate::watch::WatcherRef;

pub(crate) struct RequestTrackerTestOptions {
  pub cache: CacheRef,
  pub config_key_hasher: Option<ConfigKeyHasherRef>,
  pub options: RequestTrackerOptions,
  pub watcher: WatcherRef,
}

impl Default for RequestTrackerTestOptions {
  fn default() -> Self {
    Self {
      cache: Arc::new(InMemoryCache::default()),
      config_key_hasher: None,
      options: RequestTrackerOptions::default(),
      watcher: Arc::new(TestWatcher::default()),
    }
  }
}

pub(crate) fn request_tracker(options: RequestTrackerTestOptions) -> RequestTracker<String> {
  RequestTracker::new(RequestTrackerInitOptions {
    cache: options.cache,
    config_key_hasher: options.config_key_hasher,
    options: options.options,
    watcher: options.watcher,
  })
}

/// Watcher returning the events pushed into it, once
#[derive(Default)]
pub(crate) struct TestWatcher {
  events: Mutex<WatchEvents>,
  snapshots: AtomicUsize,
  snapshots_requested: Mutex<Vec<String>>,
}

impl TestWatcher {
  pub fn push_events(&self, events: WatchEvents) {
    self.events.lock().extend(events);
  }

  /// Snapshot tokens events were asked for, in order
  pub fn snapshots_requested(&self) -> Vec<String> {
    self.snapshots_requested.lock().clone()
  }
}

#[async_trait]
impl Watcher for TestWatcher {
  async fn get_events_since(&self, _watch_dir: &Path, snapshot: &str) -> anyhow::Result<WatchEvents> {
    self.snapshots_requested.lock().push(snapshot.to_string());
    Ok(std::mem::take(&mut *self.events.lock()))
  }

  async fn write_snapshot(&self, _watch_dir: &Path) -> anyhow::Result<String> {
    let snapshot = self.snapshots.fetch_add(1, Ordering::SeqCst);
    Ok(format!("snapshot-{snapshot}"))
  }
}

/// In-memory cache that records the keys written to it
#[derive(Clone, Default)]
pub(crate) struct RecordingCache {
  inner: InMemoryCache,
  writes: Arc<Mutex<Vec<String>>>,
}

impl RecordingCache {
  pub fn take_writes(&self) -> Vec<String> {
    std::mem::take(&mut *self.writes.lock())
  }
}

#[async_trait]
impl Cache for RecordingCache {
  async fn has_large_blob(&self, key: &str) -> anyhow::Result<bool> {
    self.inner.has_large_blob(key).await
  }

  async fn get_large_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
    self.inner.get_large_blob(key).await
  }

  async fn set_large_blob(&self, key: &str, blob: Vec<u8>) -> anyhow::Result<()> {
    self.writes.lock().push(key.to_string());
    self.inner.set_large_blob(key, blob).await
  }

  async fn delete_large_blob(&self, key: &str) -> anyhow::Result<()> {
    self.inner.delete_large_blob(key).await
  }
}

#[derive(Clone, Debug)]
pub(crate) enum TestInvalidation {
  FileUpdate(PathBuf),
  FileDelete(PathBuf),
  FileCreate(FileCreateInvalidation),
  Env(String),
  Option(String),
  Startup,
  Build,
}

/// What a [`TestRequest`] was told when it ran
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TestRun {
  pub invalidate_reason: InvalidateReason,
  pub previous_invalidations: Vec<RequestInvalidation>,
}

/// Request whose id is its name. It registers its invalidations, runs its sub-requests
/// concurrently and returns `name(child,child)`, or just `name` without sub-requests.
///
/// Clones share their run history and failure switch.
#[derive(Clone, Debug, Default)]
pub(crate) struct TestRequest {
  name: String,
  subrequests: Vec<TestRequest>,
  invalidations: Vec<TestInvalidation>,
  fail: Arc<AtomicBool>,
  gate: Option<Arc<Notify>>,
  runs: Arc<Mutex<Vec<TestRun>>>,
}

impl Hash for TestRequest {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.name.hash(state);
  }
}

impl TestRequest {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      ..Self::default()
    }
  }

  pub fn with_subrequests(mut self, subrequests: Vec<TestRequest>) -> Self {
    self.subrequests = subrequests;
    self
  }

  pub fn with_invalidation(mut self, invalidation: TestInvalidation) -> Self {
    self.invalidations.push(invalidation);
    self
  }

  pub fn with_file_update(self, path: &str) -> Self {
    self.with_invalidation(TestInvalidation::FileUpdate(PathBuf::from(path)))
  }

  pub fn with_env(self, name: &str) -> Self {
    self.with_invalidation(TestInvalidation::Env(name.to_string()))
  }

  pub fn with_startup(self) -> Self {
    self.with_invalidation(TestInvalidation::Startup)
  }

  pub fn with_failure(self) -> Self {
    self.set_failing(true);
    self
  }

  /// Block every run until `gate` is notified
  pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn set_failing(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }

  pub fn run_count(&self) -> usize {
    self.runs.lock().len()
  }

  pub fn runs(&self) -> Vec<TestRun> {
    self.runs.lock().clone()
  }
}

#[async_trait]
impl Request<String> for TestRequest {
  fn id(&self) -> ContentKey {
    self.name.clone()
  }

  fn request_type(&self) -> RequestType {
    RequestType::Asset
  }

  async fn run(&self, context: RunRequestContext<String>) -> Result<String, RunRequestError> {
    self.runs.lock().push(TestRun {
      invalidate_reason: context.invalidate_reason(),
      previous_invalidations: context.get_invalidations().to_vec(),
    });

    if let Some(gate) = &self.gate {
      gate.notified().await;
    }

    for invalidation in self.invalidations.iter() {
      match invalidation {
        TestInvalidation::FileUpdate(path) => context.invalidate_on_file_update(path),
        TestInvalidation::FileDelete(path) => context.invalidate_on_file_delete(path),
        TestInvalidation::FileCreate(input) => context.invalidate_on_file_create(input.clone()),
        TestInvalidation::Env(name) => context.invalidate_on_env_change(name),
        TestInvalidation::Option(name) => context.invalidate_on_option_change(name),
        TestInvalidation::Startup => context.invalidate_on_startup(),
        TestInvalidation::Build => context.invalidate_on_build(),
      }
    }

    if self.fail.load(Ordering::SeqCst) {
      return Err(anyhow!("{} failed", self.name));
    }

    if self.subrequests.is_empty() {
      return Ok(self.name.clone());
    }

    let results = context.run_requests(self.subrequests.clone()).await?;
    let results = results
      .iter()
      .map(|result| result.as_str())
      .collect::<Vec<_>>();

    Ok(format!("{}({})", self.name, results.join(",")))
  }
}
