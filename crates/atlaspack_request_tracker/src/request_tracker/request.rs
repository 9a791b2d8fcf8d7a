use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dyn_hash::DynHash;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::hash::finish_hex;
use crate::hash::IdentifierHasher;
use crate::options::RequestTrackerOptions;
use crate::project_path::to_project_path;
use crate::request_graph::ContentKey;
use crate::request_graph::FileCreateInvalidation;
use crate::request_graph::InvalidateReason;
use crate::request_graph::NodeId;
use crate::request_graph::RequestInvalidation;
use crate::request_graph::RequestType;

use super::RequestTracker;

/// Values requests produce. Results are shared between every caller of a request and
/// persisted with the graph, hence the bounds.
pub trait RequestOutput:
  Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> RequestOutput for T where
  T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

pub type RunRequestError = anyhow::Error;

/// A unit of cacheable work.
///
/// Two requests with the same [`Request::id`] are the same request: only one of them runs and
/// both callers receive its result.
#[async_trait]
pub trait Request<T: RequestOutput>: DynHash + Send + Sync + Debug + 'static {
  fn id(&self) -> ContentKey {
    let mut hasher = IdentifierHasher::default();
    std::any::type_name::<Self>().hash(&mut hasher);
    self.dyn_hash(&mut hasher);
    finish_hex(&hasher)
  }

  fn request_type(&self) -> RequestType;

  async fn run(&self, request_context: RunRequestContext<T>) -> Result<T, RunRequestError>;
}

/// This is the API for requests to call back onto the [`RequestTracker`].
///
/// Every invalidation registered here is attached to the running request. Sub-requests run
/// through the context become children of the running request once it completes, replacing
/// the children of its previous run.
pub struct RunRequestContext<T: RequestOutput> {
  invalidate_reason: InvalidateReason,
  previous_invalidations: Arc<Vec<RequestInvalidation>>,
  request_id: NodeId,
  sub_request_content_keys: Arc<Mutex<IndexSet<ContentKey>>>,
  tracker: RequestTracker<T>,
}

impl<T: RequestOutput> Clone for RunRequestContext<T> {
  fn clone(&self) -> Self {
    Self {
      invalidate_reason: self.invalidate_reason,
      previous_invalidations: self.previous_invalidations.clone(),
      request_id: self.request_id,
      sub_request_content_keys: self.sub_request_content_keys.clone(),
      tracker: self.tracker.clone(),
    }
  }
}

impl<T: RequestOutput> RunRequestContext<T> {
  pub(super) fn new(
    tracker: RequestTracker<T>,
    request_id: NodeId,
    invalidate_reason: InvalidateReason,
    previous_invalidations: Vec<RequestInvalidation>,
  ) -> Self {
    Self {
      invalidate_reason,
      previous_invalidations: Arc::new(previous_invalidations),
      request_id,
      sub_request_content_keys: Arc::new(Mutex::new(IndexSet::new())),
      tracker,
    }
  }

  pub(super) fn sub_request_content_keys(&self) -> Arc<Mutex<IndexSet<ContentKey>>> {
    self.sub_request_content_keys.clone()
  }

  pub fn options(&self) -> &RequestTrackerOptions {
    self.tracker.options()
  }

  pub fn project_root(&self) -> &Path {
    &self.options().project_root
  }

  /// Why this request is running. Empty on the first run of a request.
  pub fn invalidate_reason(&self) -> InvalidateReason {
    self.invalidate_reason
  }

  /// The update invalidations registered by the previous run of this request
  pub fn get_invalidations(&self) -> &[RequestInvalidation] {
    &self.previous_invalidations
  }

  fn project_path(&self, file_path: &Path) -> PathBuf {
    to_project_path(self.project_root(), file_path)
  }

  pub fn invalidate_on_file_update(&self, file_path: impl AsRef<Path>) {
    let file_path = self.project_path(file_path.as_ref());
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_file_update(self.request_id, &file_path));
  }

  pub fn invalidate_on_file_delete(&self, file_path: impl AsRef<Path>) {
    let file_path = self.project_path(file_path.as_ref());
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_file_delete(self.request_id, &file_path));
  }

  pub fn invalidate_on_file_create(&self, invalidation: FileCreateInvalidation) {
    let invalidation = match invalidation {
      FileCreateInvalidation::Path { file_path } => FileCreateInvalidation::Path {
        file_path: self.project_path(&file_path),
      },
      FileCreateInvalidation::FileNameAbove {
        file_name,
        above_file_path,
      } => FileCreateInvalidation::FileNameAbove {
        file_name,
        above_file_path: self.project_path(&above_file_path),
      },
      glob @ FileCreateInvalidation::Glob { .. } => glob,
    };

    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_file_create(self.request_id, &invalidation));
  }

  /// Rerun when the environment variable has a different value on a later start
  pub fn invalidate_on_env_change(&self, name: &str) {
    let value = self.options().env.get(name).map(String::as_str);
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_env_change(self.request_id, name, value));
  }

  /// Rerun when the build option with this dotted name changes between starts
  pub fn invalidate_on_option_change(&self, name: &str) {
    let value = self.options().option_value(name);
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_option_change(self.request_id, name, value));
  }

  pub fn invalidate_on_config_key_change(
    &self,
    file_path: impl AsRef<Path>,
    config_key: &str,
    content_hash: &str,
  ) {
    let file_path = self.project_path(file_path.as_ref());
    self.tracker.with_graph_mut(|graph| {
      graph.invalidate_on_config_key_change(self.request_id, &file_path, config_key, content_hash)
    });
  }

  pub fn invalidate_on_startup(&self) {
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_startup(self.request_id));
  }

  pub fn invalidate_on_build(&self) {
    self
      .tracker
      .with_graph_mut(|graph| graph.invalidate_on_build(self.request_id));
  }

  /// Whether a sub-request already has a valid result and can be reused without running it.
  ///
  /// A skipped sub-request is still recorded as a child of this request.
  pub fn can_skip_subrequest(&self, content_key: &str) -> bool {
    let can_skip = self.tracker.read_graph(|graph| {
      graph
        .get_node_id_by_content_key(content_key)
        .is_some_and(|node_id| graph.has_valid_result(node_id))
    });

    if can_skip {
      self
        .sub_request_content_keys
        .lock()
        .insert(content_key.to_string());
    }

    can_skip
  }

  /// Content keys of the sub-requests from the previous run
  pub fn get_sub_requests(&self) -> Vec<ContentKey> {
    self.tracker.read_graph(|graph| {
      graph
        .get_sub_requests(self.request_id)
        .into_iter()
        .map(|request| request.id.clone())
        .collect()
    })
  }

  pub fn get_invalid_sub_requests(&self) -> Vec<ContentKey> {
    self.tracker.read_graph(|graph| {
      graph
        .get_invalid_sub_requests(self.request_id)
        .into_iter()
        .map(|request| request.id.clone())
        .collect()
    })
  }

  /// Run a child request of the current request
  pub async fn run_request<R: Request<T>>(&self, request: R) -> anyhow::Result<Arc<T>> {
    self.sub_request_content_keys.lock().insert(request.id());
    self.tracker.run_request(request).await
  }

  /// Run child requests concurrently. Results are in the order of `requests`.
  ///
  /// Every child runs to completion even when one of them fails; the first failure is returned.
  pub async fn run_requests<R: Request<T>>(&self, requests: Vec<R>) -> anyhow::Result<Vec<Arc<T>>> {
    let count = requests.len();
    let mut jobs = JoinSet::new();

    for (index, request) in requests.into_iter().enumerate() {
      let context = self.clone();
      jobs.spawn(async move { (index, context.run_request(request).await) });
    }

    let mut results = vec![None; count];
    let mut first_error = None;

    while let Some(job) = jobs.join_next().await {
      let (index, result) = job?;
      match result {
        Ok(result) => results[index] = Some(result),
        Err(error) => {
          first_error.get_or_insert(error);
        }
      }
    }

    if let Some(error) = first_error {
      return Err(error);
    }

    Ok(results.into_iter().flatten().collect())
  }

  /// Result of the previous run of the current request, if it had one
  pub async fn get_previous_result(&self) -> anyhow::Result<Option<Arc<T>>> {
    let content_key = self.tracker.read_graph(|graph| {
      graph
        .get_request_node(self.request_id)
        .map(|request| request.id.clone())
    });

    match content_key {
      Some(content_key) => self.tracker.get_request_result(&content_key).await,
      None => Ok(None),
    }
  }

  /// Result of any request, reading it back from the cache if needed
  pub async fn get_request_result(&self, content_key: &str) -> anyhow::Result<Option<Arc<T>>> {
    self.tracker.get_request_result(content_key).await
  }
}
