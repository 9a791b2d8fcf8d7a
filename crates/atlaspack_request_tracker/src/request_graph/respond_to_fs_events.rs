use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use glob_match::glob_match;

use crate::config_key::ConfigKeyHasher;
use crate::error::RequestTrackerError;
use crate::project_path::is_directory_inside;
use crate::request_tracker::RequestOutput;
use crate::watch::WatchEvent;
use crate::watch::WatchEventType;

use super::file_content_key;
use super::file_name_content_key;
use super::InvalidateReason;
use super::NodeId;
use super::RequestEdgeType;
use super::RequestGraph;
use super::RequestGraphNode;

/// How often the invalidation time budget is checked
const BUDGET_CHECK_INTERVAL: usize = 256;

impl<T: RequestOutput> RequestGraph<T> {
  /// Invalidate the requests affected by a batch of watcher events.
  ///
  /// Event paths must be relative to the project root. Returns whether anything was
  /// invalidated. When replaying the events is predicted to take longer than `threshold`, an
  /// [`RequestTrackerError::InvalidationTimeout`] is returned and the graph must be discarded.
  #[tracing::instrument(level = "info", skip_all, fields(events = events.len()))]
  pub fn respond_to_fs_events(
    &mut self,
    events: &[WatchEvent],
    config_key_hasher: &dyn ConfigKeyHasher,
    threshold: Duration,
  ) -> Result<bool, RequestTrackerError> {
    let start = Instant::now();
    let mut did_invalidate = false;

    for (index, event) in events.iter().enumerate() {
      let processed = index + 1;
      if processed % BUDGET_CHECK_INTERVAL == 0 {
        let predicted = start
          .elapsed()
          .mul_f64(events.len() as f64 / processed as f64);

        if predicted > threshold {
          tracing::warn!(
            watcher_event_count = events.len(),
            predicted_ms = predicted.as_millis() as u64,
            "Building with clean cache. Cache invalidation took too long."
          );
          return Err(RequestTrackerError::InvalidationTimeout {
            predicted,
            threshold,
          });
        }
      }

      let file_path = event.path.as_path();

      // The whole project was replaced, so every request may be stale
      if event.kind == WatchEventType::Create && file_path.as_os_str().is_empty() {
        tracing::debug!("Watcher reported project root create event, invalidating all requests");
        self.invalidate_all_requests(InvalidateReason::FILE_CREATE);
        return Ok(true);
      }

      let file_node = self.get_file_node(file_path);

      match (event.kind, file_node) {
        (WatchEventType::Create | WatchEventType::Update, Some(file_node)) => {
          // Watchers report changes to files they never saw as created, so updates of known
          // files reported as creates still need to invalidate
          did_invalidate |= self.invalidate_connected_requests(
            file_node,
            RequestEdgeType::InvalidatedByUpdate,
            InvalidateReason::FILE_UPDATE,
          );

          if event.kind == WatchEventType::Create {
            did_invalidate |= self.invalidate_connected_requests(
              file_node,
              RequestEdgeType::InvalidatedByCreate,
              InvalidateReason::FILE_CREATE,
            );
          }
        }
        (WatchEventType::Create, None) => {
          did_invalidate |= self.invalidate_file_name_matches(file_path);
          did_invalidate |= self.invalidate_glob_matches(file_path);
        }
        (WatchEventType::Delete, Some(file_node)) => {
          did_invalidate |= self.invalidate_connected_requests(
            file_node,
            RequestEdgeType::InvalidatedByDelete,
            InvalidateReason::FILE_DELETE,
          );

          self.remove_node(file_node);
        }
        (WatchEventType::Update | WatchEventType::Delete, None) => {}
      }

      did_invalidate |= self.revalidate_config_keys(file_path, event.kind, config_key_hasher);
    }

    Ok(did_invalidate && !self.invalid_nodes.is_empty())
  }

  fn get_file_node(&self, file_path: &Path) -> Option<NodeId> {
    self
      .get_node_id_by_content_key(&file_content_key(file_path))
      .filter(|node_id| matches!(self.graph[*node_id], RequestGraphNode::File { .. }))
  }

  /// Match a created file against the file name patterns registered through
  /// `FileCreateInvalidation::FileNameAbove`
  fn invalidate_file_name_matches(&mut self, file_path: &Path) -> bool {
    let Some(basename) = file_path.file_name() else {
      return false;
    };

    let Some(file_name_node) =
      self.get_node_id_by_content_key(&file_name_content_key(&basename.to_string_lossy()))
    else {
      return false;
    };

    let above = self
      .get_node_ids_connected_to(file_name_node, RequestEdgeType::InvalidatedByCreateAbove)
      .into_iter()
      .filter(|node_id| matches!(self.graph[*node_id], RequestGraphNode::File { .. }))
      .collect::<Vec<_>>();

    if above.is_empty() {
      return false;
    }

    self.invalidate_file_name_node(file_name_node, file_path, &above);
    true
  }

  /// Walk up the directories of `file_path` alongside the file name segments of the pattern.
  ///
  /// At every level, a segment with an edge back to one of the `above` files completes a
  /// pattern. The pattern matches when that file lives inside the directory the segment was
  /// found in.
  fn invalidate_file_name_node(&mut self, file_name_node: NodeId, file_path: &Path, above: &[NodeId]) {
    let mut node_id = file_name_node;
    let mut file_path = file_path.to_path_buf();

    loop {
      let dirname = file_path.parent().unwrap_or(Path::new("")).to_path_buf();

      for match_node in above {
        if !self.has_edge(node_id, *match_node, RequestEdgeType::InvalidatedByCreateAbove) {
          continue;
        }

        let is_match = match &self.graph[*match_node] {
          RequestGraphNode::File { path } => is_directory_inside(path, &dirname),
          _ => false,
        };

        if is_match {
          self.invalidate_connected_requests(
            *match_node,
            RequestEdgeType::InvalidatedByCreate,
            InvalidateReason::FILE_CREATE,
          );
        }
      }

      let Some(parent_name) = dirname.file_name() else {
        break;
      };

      let Some(parent_node) =
        self.get_node_id_by_content_key(&file_name_content_key(&parent_name.to_string_lossy()))
      else {
        break;
      };

      if !self.has_edge(node_id, parent_node, RequestEdgeType::Dirname) {
        break;
      }

      node_id = parent_node;
      file_path = dirname;
    }
  }

  fn invalidate_glob_matches(&mut self, file_path: &Path) -> bool {
    let path = file_path.to_string_lossy();
    let matches = self
      .glob_nodes
      .iter()
      .filter(|node_id| match &self.graph[**node_id] {
        RequestGraphNode::Glob { pattern } => glob_match(pattern, &path),
        _ => false,
      })
      .copied()
      .collect::<Vec<_>>();

    let mut did_invalidate = false;
    for glob_node in matches {
      did_invalidate |= self.invalidate_connected_requests(
        glob_node,
        RequestEdgeType::InvalidatedByCreate,
        InvalidateReason::FILE_CREATE,
      );
    }

    did_invalidate
  }

  /// Config key nodes only invalidate when the hash of their key changed. Invalid nodes are
  /// removed; the rerun request registers the new hash.
  fn revalidate_config_keys(
    &mut self,
    file_path: &Path,
    kind: WatchEventType,
    config_key_hasher: &dyn ConfigKeyHasher,
  ) -> bool {
    if kind == WatchEventType::Create {
      return false;
    }

    let Some(node_ids) = self.config_key_nodes.get(file_path).cloned() else {
      return false;
    };

    let mut did_invalidate = false;
    for node_id in node_ids {
      let is_invalid = match self.graph.node_weight(node_id) {
        Some(RequestGraphNode::ConfigKey {
          key, content_hash, ..
        }) => match kind {
          WatchEventType::Delete => true,
          _ => match config_key_hasher.content_hash(file_path, key) {
            Ok(hash) => hash != *content_hash,
            Err(error) => {
              tracing::debug!(
                path = %file_path.display(),
                %error,
                "Failed to hash config key, treating it as changed"
              );
              true
            }
          },
        },
        _ => false,
      };

      if !is_invalid {
        continue;
      }

      let reason = match kind {
        WatchEventType::Delete => InvalidateReason::FILE_DELETE,
        _ => InvalidateReason::FILE_UPDATE,
      };

      self.invalidate_connected_requests(node_id, RequestEdgeType::InvalidatedByUpdate, reason);
      self.remove_node(node_id);
      did_invalidate = true;
    }

    did_invalidate
  }
}
