use std::time::Duration;

/// Failures raised by the request tracker itself, as opposed to errors returned by request
/// implementations, which are propagated untouched.
#[derive(thiserror::Error, Debug)]
pub enum RequestTrackerError {
  #[error("Build was aborted")]
  BuildAbort,
  #[error(
    "Responding to file system events exceeded threshold ({predicted:?} > {threshold:?}), start with empty cache."
  )]
  InvalidationTimeout {
    predicted: Duration,
    threshold: Duration,
  },
  #[error("Serialization was aborted")]
  SerializationAborted,
  #[error("RequestTracker node chunk {index}: invalid node count, expected {expected} got {actual}")]
  InvalidNodeCount {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("RequestTracker node chunk {index} is missing from the cache")]
  MissingNodeChunk { index: usize },
  #[error("RequestTracker graph has an edge between missing nodes {from} -> {to}")]
  InvalidEdge { from: usize, to: usize },
}

impl RequestTrackerError {
  /// Errors meaning the persisted graph can't be trusted and a fresh one must be used
  pub fn requires_fresh_graph(&self) -> bool {
    matches!(
      self,
      RequestTrackerError::InvalidationTimeout { .. }
        | RequestTrackerError::InvalidNodeCount { .. }
        | RequestTrackerError::MissingNodeChunk { .. }
        | RequestTrackerError::InvalidEdge { .. }
    )
  }
}
