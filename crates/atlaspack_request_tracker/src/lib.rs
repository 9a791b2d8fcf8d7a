//! Incremental request tracking for atlaspack builds.
//!
//! A [`RequestTracker`] runs named, cacheable requests, records what each of them
//! depends on in a [`RequestGraph`] and persists that graph between runs so the next
//! build only reruns the requests that were invalidated.
pub use cache::*;
pub use config_key::*;
pub use error::*;
pub use options::*;
pub use request_graph::*;
pub use request_tracker::*;
pub use watch::*;

pub mod cache;
pub mod hash;
pub mod project_path;
pub mod request_graph;
pub mod request_tracker;

mod config_key;
mod error;
mod options;
mod watch;

#[cfg(test)]
mod test_utils;
