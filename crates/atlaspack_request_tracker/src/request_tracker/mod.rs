pub use self::abort_signal::*;
pub use self::request::*;
pub use self::request_graph_cache::*;
pub use self::request_tracker::*;

mod abort_signal;
mod request;
mod request_graph_cache;

#[allow(clippy::module_inception)]
mod request_tracker;
