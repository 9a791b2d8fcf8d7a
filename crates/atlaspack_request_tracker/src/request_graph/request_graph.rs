use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::stable_graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::options::hash_option_value;
use crate::options::option_value;
use crate::options::EnvMap;
use crate::request_tracker::RequestOutput;

use super::ContentKey;
use super::FileCreateInvalidation;
use super::InvalidateReason;
use super::RequestEdgeType;
use super::RequestGraphNode;
use super::RequestInvalidation;
use super::RequestNode;
use super::RequestState;
use super::RequestType;

pub type NodeId = NodeIndex;

/// [`RequestGraph`] records every request that ran, the requests they ran in turn and every
/// file, glob, environment variable, option and config key they asked to be invalidated by.
///
/// Nodes are addressed by content key. Node indices are kept stable across removals so that
/// the graph can be persisted in fixed-size chunks of the index space; see
/// [`RequestGraph::has_cached_request_chunk`].
#[derive(Debug)]
pub struct RequestGraph<T> {
  pub(super) graph: StableDiGraph<RequestGraphNode<T>, RequestEdgeType>,
  pub(super) content_key_to_node: HashMap<ContentKey, NodeId>,
  pub(super) invalid_nodes: HashSet<NodeId>,
  pub(super) incomplete_nodes: HashSet<NodeId>,
  pub(super) glob_nodes: HashSet<NodeId>,
  pub(super) env_nodes: HashSet<NodeId>,
  pub(super) option_nodes: HashSet<NodeId>,
  pub(super) config_key_nodes: HashMap<PathBuf, HashSet<NodeId>>,
  pub(super) unpredictable_nodes: HashSet<NodeId>,
  pub(super) invalidate_on_build_nodes: HashSet<NodeId>,
  pub(super) cached_request_chunks: HashSet<usize>,
  pub(super) nodes_per_blob: usize,
}

impl<T: RequestOutput> RequestGraph<T> {
  pub fn new(nodes_per_blob: usize) -> Self {
    Self {
      graph: StableDiGraph::new(),
      content_key_to_node: HashMap::new(),
      invalid_nodes: HashSet::new(),
      incomplete_nodes: HashSet::new(),
      glob_nodes: HashSet::new(),
      env_nodes: HashSet::new(),
      option_nodes: HashSet::new(),
      config_key_nodes: HashMap::new(),
      unpredictable_nodes: HashSet::new(),
      invalidate_on_build_nodes: HashSet::new(),
      cached_request_chunks: HashSet::new(),
      nodes_per_blob: nodes_per_blob.max(1),
    }
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn nodes_per_blob(&self) -> usize {
    self.nodes_per_blob
  }

  pub fn has_content_key(&self, content_key: &str) -> bool {
    self.content_key_to_node.contains_key(content_key)
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.content_key_to_node.get(content_key).copied()
  }

  pub fn get_node(&self, node_id: NodeId) -> Option<&RequestGraphNode<T>> {
    self.graph.node_weight(node_id)
  }

  pub fn get_request_node(&self, node_id: NodeId) -> Option<&RequestNode<T>> {
    self.get_node(node_id).and_then(RequestGraphNode::as_request)
  }

  pub fn get_request_node_by_content_key(&self, content_key: &str) -> Option<&RequestNode<T>> {
    self
      .get_node_id_by_content_key(content_key)
      .and_then(|node_id| self.get_request_node(node_id))
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &RequestGraphNode<T>)> {
    self
      .graph
      .node_indices()
      .map(|node_id| (node_id, &self.graph[node_id]))
  }

  /// Add a node, or return the existing node with the same content key untouched
  pub fn add_node(&mut self, node: RequestGraphNode<T>) -> NodeId {
    let content_key = node.content_key();
    if let Some(node_id) = self.get_node_id_by_content_key(&content_key) {
      return node_id;
    }

    let node_id = self.graph.add_node(node);
    self.index_node(node_id, content_key);
    self.remove_cached_request_chunk_for_node(node_id);
    node_id
  }

  pub(super) fn index_node(&mut self, node_id: NodeId, content_key: ContentKey) {
    match &self.graph[node_id] {
      RequestGraphNode::Glob { .. } => {
        self.glob_nodes.insert(node_id);
      }
      RequestGraphNode::Env { .. } => {
        self.env_nodes.insert(node_id);
      }
      RequestGraphNode::Option { .. } => {
        self.option_nodes.insert(node_id);
      }
      RequestGraphNode::ConfigKey { path, .. } => {
        self
          .config_key_nodes
          .entry(path.clone())
          .or_default()
          .insert(node_id);
      }
      RequestGraphNode::Request(_)
      | RequestGraphNode::File { .. }
      | RequestGraphNode::FileName { .. } => {}
    }

    self.content_key_to_node.insert(content_key, node_id);
  }

  fn unindex_node(&mut self, node_id: NodeId, node: &RequestGraphNode<T>) {
    self.content_key_to_node.remove(&node.content_key());
    self.invalid_nodes.remove(&node_id);
    self.incomplete_nodes.remove(&node_id);
    self.unpredictable_nodes.remove(&node_id);
    self.invalidate_on_build_nodes.remove(&node_id);

    match node {
      RequestGraphNode::Glob { .. } => {
        self.glob_nodes.remove(&node_id);
      }
      RequestGraphNode::Env { .. } => {
        self.env_nodes.remove(&node_id);
      }
      RequestGraphNode::Option { .. } => {
        self.option_nodes.remove(&node_id);
      }
      RequestGraphNode::ConfigKey { path, .. } => {
        if let Some(nodes) = self.config_key_nodes.get_mut(path) {
          nodes.remove(&node_id);
          if nodes.is_empty() {
            self.config_key_nodes.remove(path);
          }
        }
      }
      RequestGraphNode::Request(_)
      | RequestGraphNode::File { .. }
      | RequestGraphNode::FileName { .. } => {}
    }
  }

  /// Remove a node and every node left without inbound edges because of it
  pub fn remove_node(&mut self, node_id: NodeId) {
    let mut queue = vec![node_id];

    while let Some(node_id) = queue.pop() {
      let children = self
        .graph
        .neighbors_directed(node_id, Direction::Outgoing)
        .collect::<Vec<_>>();

      let Some(node) = self.graph.remove_node(node_id) else {
        continue;
      };

      tracing::trace!(content_key = %node.content_key(), "Removing request graph node");
      self.unindex_node(node_id, &node);
      self.remove_cached_request_chunk_for_node(node_id);

      for child in children {
        if self.is_orphaned_node(child) {
          queue.push(child);
        }
      }
    }
  }

  /// Running requests are never orphans; their parent edge is only recorded once the parent completes.
  ///
  /// The edge from the top of a file name pattern back to its anchor file doesn't keep the file
  /// alive, otherwise the pattern would outlive every request that registered it.
  fn is_orphaned_node(&self, node_id: NodeId) -> bool {
    if !self.graph.contains_node(node_id) || self.incomplete_nodes.contains(&node_id) {
      return false;
    }

    let is_file = matches!(self.graph[node_id], RequestGraphNode::File { .. });

    !self
      .graph
      .edges_directed(node_id, Direction::Incoming)
      .any(|edge| !(is_file && *edge.weight() == RequestEdgeType::InvalidatedByCreateAbove))
  }

  pub fn has_edge(&self, from: NodeId, to: NodeId, edge_type: RequestEdgeType) -> bool {
    self
      .graph
      .edges_connecting(from, to)
      .any(|edge| *edge.weight() == edge_type)
  }

  fn add_edge_if_missing(&mut self, from: NodeId, to: NodeId, edge_type: RequestEdgeType) {
    if !self.graph.contains_node(from) || !self.graph.contains_node(to) {
      return;
    }

    if !self.has_edge(from, to, edge_type) {
      self.graph.add_edge(from, to, edge_type);
    }
  }

  fn remove_edge(&mut self, from: NodeId, to: NodeId, edge_type: RequestEdgeType) {
    let edge = self
      .graph
      .edges_connecting(from, to)
      .find(|edge| *edge.weight() == edge_type)
      .map(|edge| edge.id());

    if let Some(edge) = edge {
      self.graph.remove_edge(edge);

      if self.is_orphaned_node(to) {
        self.remove_node(to);
      }
    }
  }

  /// Nodes with an edge of `edge_type` pointing at `node_id`
  pub fn get_node_ids_connected_to(&self, node_id: NodeId, edge_type: RequestEdgeType) -> Vec<NodeId> {
    self
      .graph
      .edges_directed(node_id, Direction::Incoming)
      .filter(|edge| *edge.weight() == edge_type)
      .map(|edge| edge.source())
      .collect()
  }

  /// Nodes `node_id` points at with an edge of `edge_type`
  pub fn get_node_ids_connected_from(&self, node_id: NodeId, edge_type: RequestEdgeType) -> Vec<NodeId> {
    self
      .graph
      .edges_directed(node_id, Direction::Outgoing)
      .filter(|edge| *edge.weight() == edge_type)
      .map(|edge| edge.target())
      .collect()
  }

  /// Make `to_node_ids` the exact set of `edge_type` targets of `from`.
  ///
  /// New edges are added before stale ones are dropped so that nodes still reachable through
  /// the new set survive orphan removal.
  fn replace_node_ids_connected_from(
    &mut self,
    from: NodeId,
    to_node_ids: &[NodeId],
    edge_type: RequestEdgeType,
  ) {
    let previous = self.get_node_ids_connected_from(from, edge_type);

    for to in to_node_ids {
      self.add_edge_if_missing(from, *to, edge_type);
    }

    for to in previous {
      if !to_node_ids.contains(&to) {
        self.remove_edge(from, to, edge_type);
      }
    }
  }

  /// Replace the sub-requests of `parent` with exactly the requests in `content_keys`
  pub fn replace_subrequests(&mut self, parent: NodeId, content_keys: &[ContentKey]) {
    let sub_requests = content_keys
      .iter()
      .filter_map(|content_key| self.get_node_id_by_content_key(content_key))
      .collect::<Vec<_>>();

    self.replace_node_ids_connected_from(parent, &sub_requests, RequestEdgeType::SubRequest);
  }

  pub fn get_sub_requests(&self, node_id: NodeId) -> Vec<&RequestNode<T>> {
    self
      .get_node_ids_connected_from(node_id, RequestEdgeType::SubRequest)
      .into_iter()
      .filter_map(|node_id| self.get_request_node(node_id))
      .collect()
  }

  pub fn get_invalid_sub_requests(&self, node_id: NodeId) -> Vec<&RequestNode<T>> {
    self
      .get_node_ids_connected_from(node_id, RequestEdgeType::SubRequest)
      .into_iter()
      .filter(|node_id| self.invalid_nodes.contains(node_id))
      .filter_map(|node_id| self.get_request_node(node_id))
      .collect()
  }

  /// Mark a request invalid along with every request that depends on it through sub-request
  /// edges. Non-request nodes are ignored.
  pub fn invalidate_node(&mut self, node_id: NodeId, reason: InvalidateReason) {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([node_id]);

    while let Some(node_id) = queue.pop_front() {
      if !visited.insert(node_id) {
        continue;
      }

      let Some(request) = self
        .graph
        .node_weight_mut(node_id)
        .and_then(RequestGraphNode::as_request_mut)
      else {
        continue;
      };

      request.invalidate_reason |= reason;
      self.invalid_nodes.insert(node_id);
      // The chunk holding this node on disk is now stale
      self.remove_cached_request_chunk_for_node(node_id);

      queue.extend(self.get_node_ids_connected_to(node_id, RequestEdgeType::SubRequest));
    }
  }

  pub(super) fn invalidate_all_requests(&mut self, reason: InvalidateReason) {
    let requests = self
      .nodes()
      .filter(|(_, node)| node.as_request().is_some())
      .map(|(node_id, _)| node_id)
      .collect::<Vec<_>>();

    for node_id in requests {
      self.invalidate_node(node_id, reason);
    }
  }

  /// Invalidate every request with an `edge_type` edge to `node_id`
  pub(super) fn invalidate_connected_requests(
    &mut self,
    node_id: NodeId,
    edge_type: RequestEdgeType,
    reason: InvalidateReason,
  ) -> bool {
    let requests = self.get_node_ids_connected_to(node_id, edge_type);
    for request in requests.iter() {
      self.invalidate_node(*request, reason);
    }
    !requests.is_empty()
  }

  fn is_request(&self, node_id: NodeId) -> bool {
    self.get_request_node(node_id).is_some()
  }

  pub fn invalidate_on_file_update(&mut self, request_id: NodeId, file_path: &Path) {
    if !self.is_request(request_id) {
      return;
    }

    let file = self.add_node(RequestGraphNode::file(file_path));
    self.add_edge_if_missing(request_id, file, RequestEdgeType::InvalidatedByUpdate);
  }

  pub fn invalidate_on_file_delete(&mut self, request_id: NodeId, file_path: &Path) {
    if !self.is_request(request_id) {
      return;
    }

    let file = self.add_node(RequestGraphNode::file(file_path));
    self.add_edge_if_missing(request_id, file, RequestEdgeType::InvalidatedByDelete);
  }

  pub fn invalidate_on_file_create(&mut self, request_id: NodeId, input: &FileCreateInvalidation) {
    if !self.is_request(request_id) {
      return;
    }

    let node_id = match input {
      FileCreateInvalidation::Glob { glob } => self.add_node(RequestGraphNode::Glob {
        pattern: glob.clone(),
      }),
      FileCreateInvalidation::Path { file_path } => self.add_node(RequestGraphNode::file(file_path)),
      FileCreateInvalidation::FileNameAbove {
        file_name,
        above_file_path,
      } => self.add_file_name_pattern(file_name, above_file_path),
    };

    self.add_edge_if_missing(request_id, node_id, RequestEdgeType::InvalidatedByCreate);
  }

  /// Store a file name pattern such as `node_modules/foo` as a chain of file name segments,
  /// basename first, linked to their parent segment by dirname edges. Common segments are
  /// shared between patterns so the chain forms a trie.
  ///
  /// The `above_file_path` file node points at the basename segment and the top segment points
  /// back at the file node; matching walks from the basename up until it reaches an edge back
  /// to a file node.
  fn add_file_name_pattern(&mut self, file_name: &str, above_file_path: &Path) -> NodeId {
    let mut first = None;
    let mut last: Option<NodeId> = None;

    for part in file_name.split('/').filter(|part| !part.is_empty()).rev() {
      let node_id = self.add_node(RequestGraphNode::FileName {
        name: part.to_string(),
      });

      if let Some(last) = last {
        self.add_edge_if_missing(last, node_id, RequestEdgeType::Dirname);
      }

      first.get_or_insert(node_id);
      last = Some(node_id);
    }

    let file = self.add_node(RequestGraphNode::file(above_file_path));

    if let (Some(first), Some(last)) = (first, last) {
      self.add_edge_if_missing(file, first, RequestEdgeType::InvalidatedByCreateAbove);
      self.add_edge_if_missing(last, file, RequestEdgeType::InvalidatedByCreateAbove);
    }

    file
  }

  pub fn invalidate_on_env_change(&mut self, request_id: NodeId, name: &str, value: Option<&str>) {
    if !self.is_request(request_id) {
      return;
    }

    let node_id = self.add_node(RequestGraphNode::Env {
      name: name.to_string(),
      value: value.map(String::from),
    });

    let mut changed = false;
    if let Some(RequestGraphNode::Env { value: stored, .. }) = self.graph.node_weight_mut(node_id) {
      if stored.as_deref() != value {
        *stored = value.map(String::from);
        changed = true;
      }
    }
    if changed {
      self.remove_cached_request_chunk_for_node(node_id);
    }

    self.add_edge_if_missing(request_id, node_id, RequestEdgeType::InvalidatedByUpdate);
  }

  pub fn invalidate_on_option_change(
    &mut self,
    request_id: NodeId,
    name: &str,
    value: &serde_json::Value,
  ) {
    if !self.is_request(request_id) {
      return;
    }

    let hash = hash_option_value(value);
    let node_id = self.add_node(RequestGraphNode::Option {
      name: name.to_string(),
      hash: hash.clone(),
    });

    let mut changed = false;
    if let Some(RequestGraphNode::Option { hash: stored, .. }) = self.graph.node_weight_mut(node_id) {
      if *stored != hash {
        *stored = hash;
        changed = true;
      }
    }
    if changed {
      self.remove_cached_request_chunk_for_node(node_id);
    }

    self.add_edge_if_missing(request_id, node_id, RequestEdgeType::InvalidatedByUpdate);
  }

  pub fn invalidate_on_config_key_change(
    &mut self,
    request_id: NodeId,
    file_path: &Path,
    config_key: &str,
    content_hash: &str,
  ) {
    if !self.is_request(request_id) {
      return;
    }

    let node_id = self.add_node(RequestGraphNode::ConfigKey {
      path: file_path.to_path_buf(),
      key: config_key.to_string(),
      content_hash: content_hash.to_string(),
    });

    let mut changed = false;
    if let Some(RequestGraphNode::ConfigKey {
      content_hash: stored,
      ..
    }) = self.graph.node_weight_mut(node_id)
    {
      if stored != content_hash {
        *stored = content_hash.to_string();
        changed = true;
      }
    }
    if changed {
      self.remove_cached_request_chunk_for_node(node_id);
    }

    self.add_edge_if_missing(request_id, node_id, RequestEdgeType::InvalidatedByUpdate);
  }

  /// The request reruns once every time the process starts
  pub fn invalidate_on_startup(&mut self, request_id: NodeId) {
    if self.is_request(request_id) {
      self.unpredictable_nodes.insert(request_id);
    }
  }

  /// The request reruns once at the start of every build
  pub fn invalidate_on_build(&mut self, request_id: NodeId) {
    if self.is_request(request_id) {
      self.invalidate_on_build_nodes.insert(request_id);
    }
  }

  /// Drop every invalidation a request registered, so that a rerun starts from scratch
  pub fn clear_invalidations(&mut self, request_id: NodeId) {
    self.unpredictable_nodes.remove(&request_id);
    self.invalidate_on_build_nodes.remove(&request_id);

    for edge_type in [
      RequestEdgeType::InvalidatedByUpdate,
      RequestEdgeType::InvalidatedByDelete,
      RequestEdgeType::InvalidatedByCreate,
    ] {
      self.replace_node_ids_connected_from(request_id, &[], edge_type);
    }
  }

  /// Update-type invalidations a request registered during its last run
  pub fn get_invalidations(&self, request_id: NodeId) -> Vec<RequestInvalidation> {
    if !self.graph.contains_node(request_id) {
      return Vec::new();
    }

    self
      .get_node_ids_connected_from(request_id, RequestEdgeType::InvalidatedByUpdate)
      .into_iter()
      .filter_map(|node_id| match &self.graph[node_id] {
        RequestGraphNode::File { path } => Some(RequestInvalidation::File {
          file_path: path.clone(),
        }),
        RequestGraphNode::Env { name, .. } => Some(RequestInvalidation::Env { key: name.clone() }),
        RequestGraphNode::Option { name, .. } => {
          Some(RequestInvalidation::Option { key: name.clone() })
        }
        RequestGraphNode::Request(_)
        | RequestGraphNode::Glob { .. }
        | RequestGraphNode::FileName { .. }
        | RequestGraphNode::ConfigKey { .. } => None,
      })
      .collect()
  }

  pub fn invalidate_unpredictable_nodes(&mut self) {
    let nodes = self.unpredictable_nodes.iter().copied().collect::<Vec<_>>();
    for node_id in nodes {
      self.invalidate_node(node_id, InvalidateReason::STARTUP);
    }
  }

  pub fn invalidate_on_build_nodes(&mut self) {
    let nodes = self
      .invalidate_on_build_nodes
      .iter()
      .copied()
      .collect::<Vec<_>>();
    for node_id in nodes {
      self.invalidate_node(node_id, InvalidateReason::BUILD);
    }
  }

  /// Invalidate requests depending on environment variables whose value changed
  pub fn invalidate_env_nodes(&mut self, env: &EnvMap) {
    let changed = self
      .env_nodes
      .iter()
      .filter(|node_id| match &self.graph[**node_id] {
        RequestGraphNode::Env { name, value } => env.get(name) != value.as_ref(),
        _ => false,
      })
      .copied()
      .collect::<Vec<_>>();

    for node_id in changed {
      self.invalidate_connected_requests(
        node_id,
        RequestEdgeType::InvalidatedByUpdate,
        InvalidateReason::ENV_CHANGE,
      );
    }
  }

  /// Invalidate requests depending on options whose value hash changed
  pub fn invalidate_option_nodes(&mut self, options: &serde_json::Value) {
    let changed = self
      .option_nodes
      .iter()
      .filter(|node_id| match &self.graph[**node_id] {
        RequestGraphNode::Option { name, hash } => {
          hash_option_value(option_value(options, name)) != *hash
        }
        _ => false,
      })
      .copied()
      .collect::<Vec<_>>();

    for node_id in changed {
      self.invalidate_connected_requests(
        node_id,
        RequestEdgeType::InvalidatedByUpdate,
        InvalidateReason::OPTION_CHANGE,
      );
    }
  }

  /// Mark a request as running. Existing requests keep their previous result and invalidate
  /// reason, but lose the invalidations they registered so the new run can replace them.
  pub fn start_request(&mut self, content_key: ContentKey, request_type: RequestType) -> NodeId {
    let node_id = match self.get_node_id_by_content_key(&content_key) {
      Some(node_id) => {
        self.clear_invalidations(node_id);
        node_id
      }
      None => self.add_node(RequestGraphNode::request(content_key, request_type)),
    };

    self.incomplete_nodes.insert(node_id);
    self.invalid_nodes.remove(&node_id);
    node_id
  }

  pub fn complete_request(&mut self, node_id: NodeId, result: Arc<T>) {
    self.invalid_nodes.remove(&node_id);
    self.incomplete_nodes.remove(&node_id);

    if let Some(request) = self
      .graph
      .node_weight_mut(node_id)
      .and_then(RequestGraphNode::as_request_mut)
    {
      request.invalidate_reason = InvalidateReason::VALID;
      request.result = Some(result);
      request.result_cache_key = None;
    }

    self.remove_cached_request_chunk_for_node(node_id);
  }

  /// A failed request is invalid on its own; its parents are left alone
  pub fn reject_request(&mut self, node_id: NodeId) {
    self.incomplete_nodes.remove(&node_id);

    if let Some(request) = self
      .graph
      .node_weight_mut(node_id)
      .and_then(RequestGraphNode::as_request_mut)
    {
      request.invalidate_reason |= InvalidateReason::ERROR;
      self.invalid_nodes.insert(node_id);
    }

    self.remove_cached_request_chunk_for_node(node_id);
  }

  pub fn request_state(&self, node_id: NodeId) -> Option<RequestState> {
    self.get_request_node(node_id)?;

    Some(if self.incomplete_nodes.contains(&node_id) {
      RequestState::Incomplete
    } else if self.invalid_nodes.contains(&node_id) {
      RequestState::Invalid
    } else {
      RequestState::Valid
    })
  }

  pub fn has_valid_result(&self, node_id: NodeId) -> bool {
    self.request_state(node_id) == Some(RequestState::Valid)
  }

  pub fn is_incomplete(&self, node_id: NodeId) -> bool {
    self.incomplete_nodes.contains(&node_id)
  }

  pub fn get_invalid_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.invalid_nodes.iter().copied()
  }

  pub fn get_invalid_requests(&self) -> Vec<&RequestNode<T>> {
    self
      .invalid_nodes
      .iter()
      .filter_map(|node_id| self.get_request_node(*node_id))
      .collect()
  }

  /// In-memory result of a request, if it has one
  pub fn get_request_result(&self, content_key: &str) -> Option<Arc<T>> {
    self
      .get_request_node_by_content_key(content_key)
      .and_then(|request| request.result.clone())
  }

  /// Attach a result read back from the cache. The persisted chunk is unaffected.
  pub fn set_loaded_result(&mut self, content_key: &str, result: Arc<T>) {
    if let Some(request) = self.request_node_mut(content_key) {
      request.result = Some(result);
    }
  }

  /// Forget an external result that could not be read, so the request runs again
  pub fn drop_result_cache_key(&mut self, content_key: &str) {
    let Some(node_id) = self.get_node_id_by_content_key(content_key) else {
      return;
    };

    if let Some(request) = self
      .graph
      .node_weight_mut(node_id)
      .and_then(RequestGraphNode::as_request_mut)
    {
      request.result_cache_key = None;
    }
    self.remove_cached_request_chunk_for_node(node_id);
  }

  fn request_node_mut(&mut self, content_key: &str) -> Option<&mut RequestNode<T>> {
    let node_id = self.get_node_id_by_content_key(content_key)?;
    self
      .graph
      .node_weight_mut(node_id)
      .and_then(RequestGraphNode::as_request_mut)
  }

  /// Whether chunk `index` is on disk and none of its nodes changed since it was written
  pub fn has_cached_request_chunk(&self, index: usize) -> bool {
    self.cached_request_chunks.contains(&index)
  }

  pub fn set_cached_request_chunk(&mut self, index: usize) {
    self.cached_request_chunks.insert(index);
  }

  pub fn remove_cached_request_chunk_for_node(&mut self, node_id: NodeId) {
    self
      .cached_request_chunks
      .remove(&(node_id.index() / self.nodes_per_blob));
  }
}
