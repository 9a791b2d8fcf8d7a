use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Cooperative cancellation shared between a build and its driver.
///
/// Aborting does not interrupt running requests. Their results are discarded once they
/// return, and cache writes stop at the next chunk.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
  aborted: Arc<AtomicBool>,
}

impl AbortSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn abort(&self) {
    self.aborted.store(true, Ordering::SeqCst);
  }

  pub fn is_aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }
}
