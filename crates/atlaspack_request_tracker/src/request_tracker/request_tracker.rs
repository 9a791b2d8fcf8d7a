use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::CacheRef;
use crate::config_key::ConfigKeyHasherRef;
use crate::config_key::JsonConfigKeyHasher;
use crate::error::RequestTrackerError;
use crate::options::RequestTrackerOptions;
use crate::project_path::to_project_path;
use crate::request_graph::ContentKey;
use crate::request_graph::InvalidateReason;
use crate::request_graph::NodeId;
use crate::request_graph::RequestGraph;
use crate::request_graph::RequestInvalidation;
use crate::request_graph::RequestState;
use crate::request_graph::RequestType;
use crate::watch::WatchEvent;
use crate::watch::WatchEvents;
use crate::watch::WatcherRef;

use super::load_request_graph;
use super::AbortSignal;
use super::Request;
use super::RequestOutput;
use super::RunRequestContext;

pub struct RequestTrackerInitOptions {
  pub cache: CacheRef,
  /// Defaults to hashing top-level keys of JSON files under the project root
  pub config_key_hasher: Option<ConfigKeyHasherRef>,
  pub options: RequestTrackerOptions,
  pub watcher: WatcherRef,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunRequestOptions {
  /// Run the request even when it has a valid result
  pub force: bool,
}

/// [`RequestTracker`] runs [`Request`]s, deduplicates them by id and records what each of them
/// depends on in a [`RequestGraph`].
///
/// Whenever a request needs the result of another piece of work, it asks for it through its
/// [`RunRequestContext`]. The tracker returns the cached result when it's still valid, waits for
/// the run in progress when another caller already started it, and runs it otherwise. Asking
/// for a sub-request records an edge between the two, so that invalidating the sub-request
/// also invalidates every request that used its result.
///
/// The tracker is cheap to clone; clones share the same graph.
pub struct RequestTracker<T: RequestOutput> {
  cache: CacheRef,
  config_key_hasher: ConfigKeyHasherRef,
  options: Arc<RequestTrackerOptions>,
  signal: AbortSignal,
  state: Arc<Mutex<RequestTrackerState<T>>>,
  watcher: WatcherRef,
}

impl<T: RequestOutput> Clone for RequestTracker<T> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      config_key_hasher: self.config_key_hasher.clone(),
      options: self.options.clone(),
      signal: self.signal.clone(),
      state: self.state.clone(),
      watcher: self.watcher.clone(),
    }
  }
}

struct RequestTrackerState<T> {
  graph: RequestGraph<T>,
  /// Callers waiting on a running request, told whether it succeeded
  pending_requests: HashMap<NodeId, Vec<oneshot::Sender<bool>>>,
}

enum RequestLookup<T> {
  Valid(Arc<T>),
  /// Valid, but the result lives in the cache under this key
  Cached(String),
  Pending(oneshot::Receiver<bool>),
  Start(StartedRequest),
}

struct StartedRequest {
  node_id: NodeId,
  invalidate_reason: InvalidateReason,
  previous_invalidations: Vec<RequestInvalidation>,
}

impl<T: RequestOutput> RequestTrackerState<T> {
  /// Decide what a caller of `content_key` has to do, registering the caller as the runner or
  /// as a waiter in the same step
  fn lookup_request(
    &mut self,
    content_key: &str,
    request_type: RequestType,
    force: bool,
  ) -> RequestLookup<T> {
    if let Some(node_id) = self.graph.get_node_id_by_content_key(content_key) {
      if !force && self.graph.has_valid_result(node_id) {
        if let Some(request) = self.graph.get_request_node(node_id) {
          if let Some(result) = &request.result {
            return RequestLookup::Valid(result.clone());
          }

          if let Some(result_cache_key) = &request.result_cache_key {
            return RequestLookup::Cached(result_cache_key.clone());
          }
        }
      }

      if let Some(waiters) = self.pending_requests.get_mut(&node_id) {
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        return RequestLookup::Pending(rx);
      }
    }

    RequestLookup::Start(self.start_request(content_key, request_type))
  }

  fn start_request(&mut self, content_key: &str, request_type: RequestType) -> StartedRequest {
    let previous_invalidations = self
      .graph
      .get_node_id_by_content_key(content_key)
      .map(|node_id| self.graph.get_invalidations(node_id))
      .unwrap_or_default();

    let node_id = self
      .graph
      .start_request(content_key.to_string(), request_type);

    let invalidate_reason = self
      .graph
      .get_request_node(node_id)
      .map(|request| request.invalidate_reason)
      .unwrap_or_default();

    self.pending_requests.insert(node_id, Vec::new());

    StartedRequest {
      node_id,
      invalidate_reason,
      previous_invalidations,
    }
  }

  /// Store the outcome of a run and wake up everyone waiting on it
  fn finish_request(
    &mut self,
    node_id: NodeId,
    result: Option<Arc<T>>,
    sub_request_content_keys: &[ContentKey],
  ) {
    // Sub-requests are replaced while the request is still marked running, so it can't be
    // pruned as an orphan of its own children
    self
      .graph
      .replace_subrequests(node_id, sub_request_content_keys);

    let success = result.is_some();
    match result {
      Some(result) => self.graph.complete_request(node_id, result),
      None => self.graph.reject_request(node_id),
    }

    self.notify_waiters(node_id, success);
  }

  /// Reject a run whose future was dropped before it finished
  fn abandon_request(&mut self, node_id: NodeId) {
    if self.graph.is_incomplete(node_id) {
      self.graph.reject_request(node_id);
    }

    self.notify_waiters(node_id, false);
  }

  fn notify_waiters(&mut self, node_id: NodeId, success: bool) {
    for waiter in self.pending_requests.remove(&node_id).unwrap_or_default() {
      // Waiters may have gone away
      let _ = waiter.send(success);
    }
  }
}

/// Rejects the request when dropped before [`RunningRequest::finish`]
struct RunningRequest<T: RequestOutput> {
  node_id: NodeId,
  state: Option<Arc<Mutex<RequestTrackerState<T>>>>,
}

impl<T: RequestOutput> RunningRequest<T> {
  fn finish(mut self, result: Option<Arc<T>>, sub_request_content_keys: &[ContentKey]) {
    if let Some(state) = self.state.take() {
      state
        .lock()
        .finish_request(self.node_id, result, sub_request_content_keys);
    }
  }
}

impl<T: RequestOutput> Drop for RunningRequest<T> {
  fn drop(&mut self) {
    if let Some(state) = self.state.take() {
      state.lock().abandon_request(self.node_id);
    }
  }
}

impl<T: RequestOutput> RequestTracker<T> {
  /// A tracker with an empty graph
  pub fn new(init_options: RequestTrackerInitOptions) -> Self {
    let nodes_per_blob = init_options.options.nodes_per_blob;
    Self::from_graph(init_options, RequestGraph::new(nodes_per_blob))
  }

  /// A tracker with the graph persisted by the last build, invalidated by everything that
  /// changed since
  pub async fn load(init_options: RequestTrackerInitOptions) -> anyhow::Result<Self> {
    let config_key_hasher = config_key_hasher(&init_options);
    let graph = load_request_graph(
      &init_options.options,
      &init_options.cache,
      &init_options.watcher,
      &config_key_hasher,
    )
    .await?;

    Ok(Self::from_graph(
      RequestTrackerInitOptions {
        config_key_hasher: Some(config_key_hasher),
        ..init_options
      },
      graph,
    ))
  }

  fn from_graph(init_options: RequestTrackerInitOptions, graph: RequestGraph<T>) -> Self {
    let config_key_hasher = config_key_hasher(&init_options);

    RequestTracker {
      cache: init_options.cache,
      config_key_hasher,
      options: Arc::new(init_options.options),
      signal: AbortSignal::new(),
      state: Arc::new(Mutex::new(RequestTrackerState {
        graph,
        pending_requests: HashMap::new(),
      })),
      watcher: init_options.watcher,
    }
  }

  /// Use `signal` to abort the builds run through this tracker
  pub fn with_signal(mut self, signal: AbortSignal) -> Self {
    self.signal = signal;
    self
  }

  pub fn options(&self) -> &RequestTrackerOptions {
    &self.options
  }

  pub fn signal(&self) -> &AbortSignal {
    &self.signal
  }

  pub(crate) fn cache(&self) -> &CacheRef {
    &self.cache
  }

  pub(crate) fn watcher(&self) -> &WatcherRef {
    &self.watcher
  }

  /// Inspect the request graph. The graph is locked for the duration of `f`.
  pub fn read_graph<R>(&self, f: impl FnOnce(&RequestGraph<T>) -> R) -> R {
    f(&self.state.lock().graph)
  }

  pub(crate) fn with_graph_mut<R>(&self, f: impl FnOnce(&mut RequestGraph<T>) -> R) -> R {
    f(&mut self.state.lock().graph)
  }

  /// Run a request, or return its result if it's still valid.
  ///
  /// Concurrent callers of the same request share one run. When the run fails, every caller
  /// gets an error and the request runs again the next time it's asked for.
  pub async fn run_request<R: Request<T>>(&self, request: R) -> anyhow::Result<Arc<T>> {
    self
      .run_request_with_options(request, RunRequestOptions::default())
      .await
  }

  pub async fn run_request_with_options<R: Request<T>>(
    &self,
    request: R,
    options: RunRequestOptions,
  ) -> anyhow::Result<Arc<T>> {
    let content_key = request.id();
    let request_type = request.request_type();

    let started = loop {
      let lookup = {
        let mut state = self.state.lock();
        state.lookup_request(&content_key, request_type, options.force)
      };

      match lookup {
        RequestLookup::Valid(result) => {
          tracing::trace!(%content_key, "Reusing valid request result");
          return Ok(result);
        }
        RequestLookup::Cached(result_cache_key) => {
          if let Some(result) = self
            .load_cached_result(&content_key, &result_cache_key)
            .await
          {
            return Ok(result);
          }
        }
        RequestLookup::Pending(rx) => {
          tracing::trace!(%content_key, "Waiting on running request");

          // A failed run wakes waiters with false; they go around and start it again
          if rx.await.unwrap_or(false) {
            let result = self.read_graph(|graph| graph.get_request_result(&content_key));
            if let Some(result) = result {
              return Ok(result);
            }
          }
        }
        RequestLookup::Start(started) => break started,
      }
    };

    self.execute_request(request, content_key, started).await
  }

  async fn execute_request<R: Request<T>>(
    &self,
    request: R,
    content_key: ContentKey,
    started: StartedRequest,
  ) -> anyhow::Result<Arc<T>> {
    let StartedRequest {
      node_id,
      invalidate_reason,
      previous_invalidations,
    } = started;

    tracing::debug!(
      %content_key,
      request_type = ?request.request_type(),
      ?invalidate_reason,
      "Running request"
    );

    let running = RunningRequest {
      node_id,
      state: Some(self.state.clone()),
    };

    let context = RunRequestContext::new(
      self.clone(),
      node_id,
      invalidate_reason,
      previous_invalidations,
    );
    let sub_request_content_keys = context.sub_request_content_keys();

    let result = match request.run(context).await {
      Ok(_) if self.signal.is_aborted() => Err(RequestTrackerError::BuildAbort.into()),
      result => result.map(Arc::new),
    };

    let sub_request_content_keys = sub_request_content_keys
      .lock()
      .iter()
      .cloned()
      .collect::<Vec<_>>();

    running.finish(result.as_ref().ok().cloned(), &sub_request_content_keys);

    if let Err(error) = &result {
      tracing::debug!(%content_key, %error, "Request failed");
    }

    result
  }

  /// Read a result that was stored separately from the graph. On failure the key is dropped
  /// so that the request runs again.
  async fn load_cached_result(&self, content_key: &str, result_cache_key: &str) -> Option<Arc<T>> {
    let result = async {
      let blob = self.cache.get_large_blob(result_cache_key).await?;
      let result: T = serde_json::from_slice(&blob)?;
      anyhow::Ok(Arc::new(result))
    }
    .await;

    match result {
      Ok(result) => {
        self.with_graph_mut(|graph| graph.set_loaded_result(content_key, result.clone()));
        Some(result)
      }
      Err(error) => {
        tracing::warn!(%content_key, %error, "Failed to read cached request result");
        self.with_graph_mut(|graph| graph.drop_result_cache_key(content_key));
        None
      }
    }
  }

  /// Last result of a request, valid or not, reading it back from the cache if needed
  pub async fn get_request_result(&self, content_key: &str) -> anyhow::Result<Option<Arc<T>>> {
    let (result, result_cache_key) = self.read_graph(|graph| {
      graph
        .get_request_node_by_content_key(content_key)
        .map(|request| (request.result.clone(), request.result_cache_key.clone()))
        .unwrap_or_default()
    });

    match (result, result_cache_key) {
      (Some(result), _) => Ok(Some(result)),
      (None, Some(result_cache_key)) => {
        Ok(self.load_cached_result(content_key, &result_cache_key).await)
      }
      (None, None) => Ok(None),
    }
  }

  /// Invalidate the requests affected by watcher events. Paths may be absolute.
  pub fn respond_to_fs_events(
    &self,
    events: WatchEvents,
    threshold: Duration,
  ) -> Result<bool, RequestTrackerError> {
    tracing::info!("Responding to {} watch events", events.len());

    let events = events
      .into_iter()
      .map(|event| WatchEvent {
        path: to_project_path(&self.options.project_root, &event.path),
        kind: event.kind,
      })
      .collect::<Vec<_>>();

    self.with_graph_mut(|graph| {
      graph.respond_to_fs_events(&events, self.config_key_hasher.as_ref(), threshold)
    })
  }

  /// Invalidate the requests that asked to run on every build
  pub fn invalidate_on_build_nodes(&self) {
    self.with_graph_mut(|graph| graph.invalidate_on_build_nodes());
  }

  /// Content keys of every invalid request
  pub fn get_invalid_requests(&self) -> Vec<ContentKey> {
    self.read_graph(|graph| {
      graph
        .get_invalid_requests()
        .into_iter()
        .map(|request| request.id.clone())
        .collect()
    })
  }

  pub fn request_state(&self, content_key: &str) -> Option<RequestState> {
    self.read_graph(|graph| {
      graph
        .get_node_id_by_content_key(content_key)
        .and_then(|node_id| graph.request_state(node_id))
    })
  }
}

fn config_key_hasher(init_options: &RequestTrackerInitOptions) -> ConfigKeyHasherRef {
  init_options.config_key_hasher.clone().unwrap_or_else(|| {
    Arc::new(JsonConfigKeyHasher::new(
      init_options.options.project_root.clone(),
    ))
  })
}
