pub use self::invalidate_reason::*;
pub use self::node::*;
pub use self::request_graph::*;
pub use self::serialize::*;

mod invalidate_reason;
mod node;
mod respond_to_fs_events;
mod serialize;

#[allow(clippy::module_inception)]
mod request_graph;
