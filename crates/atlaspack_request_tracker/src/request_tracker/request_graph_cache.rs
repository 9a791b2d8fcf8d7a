use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::CacheRef;
use crate::config_key::ConfigKeyHasherRef;
use crate::error::RequestTrackerError;
use crate::hash::hash_string;
use crate::options::RequestTrackerOptions;
use crate::project_path::to_project_path;
use crate::request_graph::RequestGraph;
use crate::request_graph::RequestGraphNode;
use crate::request_graph::SerializedNodeChunk;
use crate::request_graph::SerializedRequestGraph;
use crate::watch::WatchEvent;
use crate::watch::WatcherRef;

use super::AbortSignal;
use super::RequestOutput;
use super::RequestTracker;

pub fn request_graph_key(cache_key: &str) -> String {
  format!("requestGraph-{cache_key}")
}

pub fn request_graph_node_key(index: usize, cache_key: &str) -> String {
  format!("requestGraph-nodes-{index}-{cache_key}")
}

pub fn snapshot_key(cache_key: &str) -> String {
  format!("snapshot-{cache_key}.txt")
}

pub fn request_result_key(content_key: &str, cache_key: &str) -> String {
  format!("requestResult-{}-{cache_key}", hash_string(content_key))
}

/// A blob to write, and the node chunk it holds if any
struct PendingWrite {
  key: String,
  blob: Vec<u8>,
  chunk: Option<usize>,
}

impl<T: RequestOutput> RequestTracker<T> {
  /// Persist the request graph so that the next [`RequestTracker::load`] can reuse it.
  ///
  /// Only node chunks that changed since they were last written are written again. Errors
  /// caused by an abort are ignored; the graph of the previous build stays unreadable since its
  /// metadata is deleted first, so the next start is a clean build.
  #[tracing::instrument(level = "info", skip_all)]
  pub async fn write_to_cache(&self) -> anyhow::Result<()> {
    if self.options().should_disable_cache {
      return Ok(());
    }

    match self.write_request_graph().await {
      Err(error) if self.signal().is_aborted() => {
        tracing::debug!(%error, "Request graph write was aborted");
        Ok(())
      }
      result => result,
    }
  }

  async fn write_request_graph(&self) -> anyhow::Result<()> {
    let options = self.options();
    let cache_key = options.cache_key();
    let request_graph_key = request_graph_key(&cache_key);

    // Delete an existing request graph cache, to prevent invalid states
    self.cache().delete_large_blob(&request_graph_key).await?;

    let (metadata, writes) = self.read_graph(|graph| {
      let metadata = graph.serialize_metadata();
      let mut writes = Vec::new();

      for index in 0..metadata.node_counts_per_blob.len() {
        if graph.has_cached_request_chunk(index) {
          continue;
        }

        let mut chunk = graph.node_chunk(index);
        for node in chunk.iter_mut().flatten() {
          if let Some(write) = externalize_large_result(node, &cache_key, options)? {
            writes.push(write);
          }
        }

        writes.push(PendingWrite {
          key: request_graph_node_key(index, &cache_key),
          blob: serde_json::to_vec(&chunk)?,
          chunk: Some(index),
        });
      }

      anyhow::Ok((metadata, writes))
    })?;

    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_writes.max(1)));
    let mut jobs = JoinSet::new();

    for write in writes {
      jobs.spawn(write_blob(
        self.cache().clone(),
        self.signal().clone(),
        semaphore.clone(),
        write,
      ));
    }

    let mut written = 0;
    let mut first_error = None;

    while let Some(job) = jobs.join_next().await {
      match job? {
        Ok(chunk) => {
          written += 1;
          if let Some(index) = chunk {
            self.with_graph_mut(|graph| graph.set_cached_request_chunk(index));
          }
        }
        Err(error) => {
          first_error.get_or_insert(error);
        }
      }
    }

    if let Some(error) = first_error {
      return Err(error);
    }

    tracing::debug!(written, "Wrote request graph blobs");

    if self.signal().is_aborted() {
      return Err(RequestTrackerError::SerializationAborted.into());
    }

    // The metadata is written last, so a graph with missing chunks is never readable
    self
      .cache()
      .set_large_blob(&request_graph_key, serde_json::to_vec(&metadata)?)
      .await?;

    let snapshot = self.watcher().write_snapshot(&options.project_root).await?;
    self
      .cache()
      .set_large_blob(&snapshot_key(&cache_key), snapshot.into_bytes())
      .await?;

    Ok(())
  }
}

/// Move a request result larger than the configured threshold out of its node
fn externalize_large_result<T: RequestOutput>(
  node: &mut RequestGraphNode<T>,
  cache_key: &str,
  options: &RequestTrackerOptions,
) -> anyhow::Result<Option<PendingWrite>> {
  let Some(request) = node.as_request_mut() else {
    return Ok(None);
  };

  let Some(result) = &request.result else {
    return Ok(None);
  };

  let blob = serde_json::to_vec(result.as_ref())?;
  if blob.len() <= options.large_result_threshold {
    return Ok(None);
  }

  let key = request_result_key(&request.id, cache_key);
  request.result = None;
  request.result_cache_key = Some(key.clone());

  Ok(Some(PendingWrite {
    key,
    blob,
    chunk: None,
  }))
}

async fn write_blob(
  cache: CacheRef,
  signal: AbortSignal,
  semaphore: Arc<Semaphore>,
  write: PendingWrite,
) -> anyhow::Result<Option<usize>> {
  let _permit = semaphore.acquire_owned().await?;

  if signal.is_aborted() {
    return Err(RequestTrackerError::SerializationAborted.into());
  }

  cache.set_large_blob(&write.key, write.blob).await?;

  Ok(write.chunk)
}

/// Load the request graph written by the last build and replay everything that changed since.
///
/// A fresh graph is returned when caching is disabled, when nothing was written for these
/// options, when the persisted graph is corrupt or when replaying watcher events would take
/// longer than the configured threshold.
#[tracing::instrument(level = "info", skip_all)]
pub(crate) async fn load_request_graph<T: RequestOutput>(
  options: &RequestTrackerOptions,
  cache: &CacheRef,
  watcher: &WatcherRef,
  config_key_hasher: &ConfigKeyHasherRef,
) -> anyhow::Result<RequestGraph<T>> {
  let fresh_graph = || RequestGraph::new(options.nodes_per_blob);

  if options.should_disable_cache {
    return Ok(fresh_graph());
  }

  let cache_key = options.cache_key();
  let request_graph_key = request_graph_key(&cache_key);
  let snapshot_key = snapshot_key(&cache_key);

  if !cache.has_large_blob(&request_graph_key).await? {
    tracing::debug!("No cached request graph");
    return Ok(fresh_graph());
  }

  if !cache.has_large_blob(&snapshot_key).await? {
    tracing::debug!("No watcher snapshot for the cached request graph");
    return Ok(fresh_graph());
  }

  let mut graph =
    match read_request_graph(cache, &request_graph_key, &cache_key, options.nodes_per_blob).await
    {
      Ok(graph) => graph,
      Err(error) => match error.downcast_ref::<RequestTrackerError>() {
        Some(tracker_error) if tracker_error.requires_fresh_graph() => {
          tracing::error!(%error, "Cached request graph is corrupt, building with clean cache");
          return Ok(fresh_graph());
        }
        _ => return Err(error),
      },
    };

  let snapshot = String::from_utf8(cache.get_large_blob(&snapshot_key).await?)?;
  let events = watcher
    .get_events_since(&options.project_root, &snapshot)
    .await?
    .into_iter()
    .map(|event| WatchEvent {
      path: to_project_path(&options.project_root, &event.path),
      kind: event.kind,
    })
    .collect::<Vec<_>>();

  tracing::debug!(events = events.len(), nodes = graph.node_count(), "Loaded request graph");

  graph.invalidate_unpredictable_nodes();
  graph.invalidate_on_build_nodes();
  graph.invalidate_env_nodes(&options.env);
  graph.invalidate_option_nodes(&options.build_options);

  match graph.respond_to_fs_events(
    &events,
    config_key_hasher.as_ref(),
    options.invalidation_threshold(),
  ) {
    Ok(_) => Ok(graph),
    Err(error) if error.requires_fresh_graph() => Ok(fresh_graph()),
    Err(error) => Err(error.into()),
  }
}

/// Read the metadata and every node chunk of a persisted graph
pub(crate) async fn read_request_graph<T: RequestOutput>(
  cache: &CacheRef,
  request_graph_key: &str,
  cache_key: &str,
  nodes_per_blob: usize,
) -> anyhow::Result<RequestGraph<T>> {
  let metadata: SerializedRequestGraph =
    serde_json::from_slice(&cache.get_large_blob(request_graph_key).await?)?;

  let mut jobs = JoinSet::new();
  for (index, expected) in metadata.node_counts_per_blob.iter().copied().enumerate() {
    let cache = cache.clone();
    let key = request_graph_node_key(index, cache_key);

    jobs.spawn(async move {
      if !cache.has_large_blob(&key).await? {
        return Err(RequestTrackerError::MissingNodeChunk { index }.into());
      }

      let chunk: SerializedNodeChunk<T> = serde_json::from_slice(&cache.get_large_blob(&key).await?)?;
      if chunk.len() != expected {
        return Err(
          RequestTrackerError::InvalidNodeCount {
            index,
            expected,
            actual: chunk.len(),
          }
          .into(),
        );
      }

      anyhow::Ok((index, chunk))
    });
  }

  let mut chunks = (0..metadata.node_counts_per_blob.len())
    .map(|_| Vec::new())
    .collect::<Vec<SerializedNodeChunk<T>>>();

  while let Some(job) = jobs.join_next().await {
    let (index, chunk) = job??;
    chunks[index] = chunk;
  }

  let graph = RequestGraph::from_serialized(
    metadata,
    chunks.into_iter().flatten().collect(),
    nodes_per_blob,
  )?;

  Ok(graph)
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use tracing_test::traced_test;

  use crate::cache::Cache;
  use crate::cache::InMemoryCache;
  use crate::request_graph::RequestState;
  use crate::test_utils::request_tracker;
  use crate::test_utils::RecordingCache;
  use crate::test_utils::RequestTrackerTestOptions;
  use crate::test_utils::TestRequest;
  use crate::test_utils::TestWatcher;
  use crate::watch::WatchEvent;

  use super::*;

  fn cache_key() -> String {
    RequestTrackerOptions::default().cache_key()
  }

  /// Tracks the most `set_large_blob` calls that were running at once
  #[derive(Default)]
  struct ConcurrencyCache {
    inner: InMemoryCache,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
  }

  #[async_trait::async_trait]
  impl Cache for ConcurrencyCache {
    async fn has_large_blob(&self, key: &str) -> anyhow::Result<bool> {
      self.inner.has_large_blob(key).await
    }

    async fn get_large_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
      self.inner.get_large_blob(key).await
    }

    async fn set_large_blob(&self, key: &str, blob: Vec<u8>) -> anyhow::Result<()> {
      let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

      tokio::time::sleep(Duration::from_millis(5)).await;
      let result = self.inner.set_large_blob(key, blob).await;

      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      result
    }

    async fn delete_large_blob(&self, key: &str) -> anyhow::Result<()> {
      self.inner.delete_large_blob(key).await
    }
  }

  async fn reload(
    cache: &InMemoryCache,
    watcher: &Arc<TestWatcher>,
    options: RequestTrackerOptions,
  ) -> RequestTracker<String> {
    RequestTracker::load(crate::RequestTrackerInitOptions {
      cache: Arc::new(cache.clone()),
      config_key_hasher: None,
      options,
      watcher: watcher.clone(),
    })
    .await
    .unwrap()
  }

  #[tokio::test]
  async fn writes_metadata_chunks_and_snapshot() {
    let cache = InMemoryCache::default();
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a").with_subrequests(vec![TestRequest::new("b")]))
      .await
      .unwrap();
    rt.write_to_cache().await.unwrap();

    let mut keys = cache.keys().await;
    keys.sort();

    assert_eq!(
      keys,
      vec![
        request_graph_key(&cache_key()),
        request_graph_node_key(0, &cache_key()),
        snapshot_key(&cache_key()),
      ]
    );
  }

  #[tokio::test]
  async fn bounds_concurrent_chunk_writes() {
    let cache = Arc::new(ConcurrencyCache::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: cache.clone(),
      options: RequestTrackerOptions {
        max_concurrent_writes: 2,
        nodes_per_blob: 1,
        ..RequestTrackerOptions::default()
      },
      ..Default::default()
    });

    for index in 0..20 {
      rt.run_request(TestRequest::new(&format!("request-{index}")))
        .await
        .unwrap();
    }
    rt.write_to_cache().await.unwrap();

    assert_eq!(cache.max_in_flight.load(Ordering::SeqCst), 2);
    assert!(cache
      .has_large_blob(&request_graph_node_key(19, &cache_key()))
      .await
      .unwrap());
  }

  #[tokio::test]
  async fn does_nothing_when_cache_is_disabled() {
    let cache = InMemoryCache::default();
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      options: RequestTrackerOptions {
        should_disable_cache: true,
        ..RequestTrackerOptions::default()
      },
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a")).await.unwrap();
    rt.write_to_cache().await.unwrap();

    assert!(cache.keys().await.is_empty());
  }

  #[tokio::test]
  async fn reloaded_graph_reuses_valid_results() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    let failing = TestRequest::new("failing").with_failure();
    let b = TestRequest::new("b").with_file_update("src/b.js");
    let a = TestRequest::new("a").with_subrequests(vec![b.clone()]);

    rt.run_request(a.clone()).await.unwrap();
    assert!(rt.run_request(failing.clone()).await.is_err());
    rt.write_to_cache().await.unwrap();

    let reloaded = reload(&cache, &watcher, RequestTrackerOptions::default()).await;

    assert_eq!(
      reloaded.read_graph(|graph| graph.node_count()),
      rt.read_graph(|graph| graph.node_count())
    );
    assert_eq!(reloaded.get_invalid_requests(), vec![String::from("failing")]);
    assert_eq!(
      reloaded.run_request(a.clone()).await.unwrap().as_ref(),
      "a(b)"
    );
    assert_eq!(a.run_count(), 1);
    assert_eq!(b.run_count(), 1);
  }

  #[tokio::test]
  async fn reloaded_graph_is_invalidated_by_watcher_events() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    let b = TestRequest::new("b").with_file_update("src/b.js");
    let a = TestRequest::new("a").with_subrequests(vec![b.clone()]);
    let c = TestRequest::new("c").with_file_update("src/c.js");

    rt.run_request(a.clone()).await.unwrap();
    rt.run_request(c.clone()).await.unwrap();
    rt.write_to_cache().await.unwrap();

    watcher.push_events(vec![WatchEvent::update("src/b.js")]);
    let reloaded = reload(&cache, &watcher, RequestTrackerOptions::default()).await;

    let mut invalid = reloaded.get_invalid_requests();
    invalid.sort();
    assert_eq!(invalid, vec![String::from("a"), String::from("b")]);
    assert_eq!(reloaded.request_state("c"), Some(RequestState::Valid));

    reloaded.run_request(a.clone()).await.unwrap();
    assert_eq!(a.run_count(), 2);
    assert_eq!(b.run_count(), 2);
  }

  #[tokio::test]
  async fn reloaded_graph_is_invalidated_by_env_and_startup() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let options = RequestTrackerOptions {
      env: crate::EnvMap::from([(String::from("NODE_ENV"), String::from("development"))]),
      ..RequestTrackerOptions::default()
    };
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      options: options.clone(),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("env").with_env("NODE_ENV"))
      .await
      .unwrap();
    rt.run_request(TestRequest::new("startup").with_startup())
      .await
      .unwrap();
    rt.run_request(TestRequest::new("stable")).await.unwrap();
    rt.write_to_cache().await.unwrap();

    let same_env = reload(&cache, &watcher, options.clone()).await;
    assert_eq!(same_env.get_invalid_requests(), vec![String::from("startup")]);

    let changed_env = reload(
      &cache,
      &watcher,
      RequestTrackerOptions {
        env: crate::EnvMap::from([(String::from("NODE_ENV"), String::from("production"))]),
        ..options
      },
    )
    .await;
    let mut invalid = changed_env.get_invalid_requests();
    invalid.sort();
    assert_eq!(invalid, vec![String::from("env"), String::from("startup")]);
  }

  #[tokio::test]
  async fn only_rewrites_dirty_chunks() {
    let cache = RecordingCache::default();
    let options = RequestTrackerOptions {
      nodes_per_blob: 2,
      ..RequestTrackerOptions::default()
    };
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      options: options.clone(),
      ..Default::default()
    });

    for name in ["a", "b", "c", "d"] {
      rt.run_request(TestRequest::new(name)).await.unwrap();
    }
    rt.write_to_cache().await.unwrap();

    let cache_key = options.cache_key();
    let mut written = cache.take_writes();
    written.sort();
    assert_eq!(
      written,
      vec![
        request_graph_key(&cache_key),
        request_graph_node_key(0, &cache_key),
        request_graph_node_key(1, &cache_key),
        snapshot_key(&cache_key),
      ]
    );

    rt.run_request_with_options(
      TestRequest::new("d"),
      crate::RunRequestOptions { force: true },
    )
    .await
    .unwrap();
    rt.write_to_cache().await.unwrap();

    let mut written = cache.take_writes();
    written.sort();
    assert_eq!(
      written,
      vec![
        request_graph_key(&cache_key),
        request_graph_node_key(1, &cache_key),
        snapshot_key(&cache_key),
      ]
    );
  }

  #[tokio::test]
  async fn large_results_are_stored_separately_and_read_lazily() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let options = RequestTrackerOptions {
      large_result_threshold: 8,
      ..RequestTrackerOptions::default()
    };
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      options: options.clone(),
      ..Default::default()
    });

    let large = TestRequest::new("a-request-with-a-long-result");
    rt.run_request(large.clone()).await.unwrap();
    rt.write_to_cache().await.unwrap();

    let result_key = request_result_key("a-request-with-a-long-result", &options.cache_key());
    assert!(cache.has_large_blob(&result_key).await.unwrap());

    let chunk = cache
      .get_large_blob(&request_graph_node_key(0, &options.cache_key()))
      .await
      .unwrap();
    let chunk: SerializedNodeChunk<String> = serde_json::from_slice(&chunk).unwrap();
    let request = chunk[0].as_ref().and_then(|node| node.as_request()).unwrap();
    assert_eq!(request.result, None);
    assert_eq!(request.result_cache_key, Some(result_key));

    let reloaded = reload(&cache, &watcher, options).await;
    assert_eq!(
      reloaded.run_request(large.clone()).await.unwrap().as_ref(),
      "a-request-with-a-long-result"
    );
    assert_eq!(large.run_count(), 1);
  }

  #[tokio::test]
  async fn reruns_requests_whose_external_result_is_missing() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let options = RequestTrackerOptions {
      large_result_threshold: 8,
      ..RequestTrackerOptions::default()
    };
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      options: options.clone(),
      ..Default::default()
    });

    let large = TestRequest::new("a-request-with-a-long-result");
    rt.run_request(large.clone()).await.unwrap();
    rt.write_to_cache().await.unwrap();

    cache
      .delete_large_blob(&request_result_key(
        "a-request-with-a-long-result",
        &options.cache_key(),
      ))
      .await
      .unwrap();

    let reloaded = reload(&cache, &watcher, options).await;
    reloaded.run_request(large.clone()).await.unwrap();
    assert_eq!(large.run_count(), 2);
  }

  #[tokio::test]
  async fn aborted_writes_are_ignored() {
    let cache = InMemoryCache::default();
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a")).await.unwrap();
    rt.signal().abort();

    rt.write_to_cache().await.unwrap();

    assert!(!cache
      .has_large_blob(&request_graph_key(&cache_key()))
      .await
      .unwrap());
  }

  #[tokio::test]
  async fn rejects_chunks_with_the_wrong_node_count() {
    let cache = InMemoryCache::default();
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a").with_subrequests(vec![TestRequest::new("b")]))
      .await
      .unwrap();
    rt.write_to_cache().await.unwrap();

    let short_chunk: SerializedNodeChunk<String> = vec![None];
    cache
      .set_large_blob(
        &request_graph_node_key(0, &cache_key()),
        serde_json::to_vec(&short_chunk).unwrap(),
      )
      .await
      .unwrap();

    let cache: CacheRef = Arc::new(cache);
    let error = read_request_graph::<String>(
      &cache,
      &request_graph_key(&cache_key()),
      &cache_key(),
      RequestTrackerOptions::default().nodes_per_blob,
    )
    .await
    .unwrap_err();

    assert!(matches!(
      error.downcast_ref::<RequestTrackerError>(),
      Some(RequestTrackerError::InvalidNodeCount {
        index: 0,
        expected: 2,
        actual: 1
      })
    ));
  }

  #[tokio::test]
  async fn corrupt_graph_loads_as_fresh_graph() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a")).await.unwrap();
    rt.write_to_cache().await.unwrap();
    cache
      .delete_large_blob(&request_graph_node_key(0, &cache_key()))
      .await
      .unwrap();

    let reloaded = reload(&cache, &watcher, RequestTrackerOptions::default()).await;

    assert_eq!(reloaded.read_graph(|graph| graph.node_count()), 0);
  }

  #[tokio::test]
  async fn missing_snapshot_loads_as_fresh_graph() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a")).await.unwrap();
    rt.write_to_cache().await.unwrap();
    cache.delete_large_blob(&snapshot_key(&cache_key())).await.unwrap();

    let reloaded = reload(&cache, &watcher, RequestTrackerOptions::default()).await;

    assert_eq!(reloaded.read_graph(|graph| graph.node_count()), 0);
  }

  #[tokio::test]
  #[traced_test]
  async fn slow_invalidation_loads_as_fresh_graph() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a").with_file_update("src/a.js"))
      .await
      .unwrap();
    rt.write_to_cache().await.unwrap();

    watcher.push_events(
      (0..512)
        .map(|index| WatchEvent::update(format!("src/{index}.js")))
        .collect(),
    );

    let reloaded = reload(
      &cache,
      &watcher,
      RequestTrackerOptions {
        invalidation_threshold_ms: 0,
        ..RequestTrackerOptions::default()
      },
    )
    .await;

    assert_eq!(reloaded.read_graph(|graph| graph.node_count()), 0);
    assert!(logs_contain("Cache invalidation took too long"));
  }

  #[tokio::test]
  async fn reads_snapshot_token_written_by_the_watcher() {
    let cache = InMemoryCache::default();
    let watcher = Arc::new(TestWatcher::default());
    let rt = request_tracker(RequestTrackerTestOptions {
      cache: Arc::new(cache.clone()),
      watcher: watcher.clone(),
      ..Default::default()
    });

    rt.run_request(TestRequest::new("a")).await.unwrap();
    rt.write_to_cache().await.unwrap();
    reload(&cache, &watcher, RequestTrackerOptions::default()).await;

    let snapshot = cache.get_large_blob(&snapshot_key(&cache_key())).await.unwrap();
    assert_eq!(
      watcher.snapshots_requested(),
      vec![String::from_utf8(snapshot).unwrap()]
    );
  }
}
