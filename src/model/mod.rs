//! The user-model graph and scene placement instances.
//!
//! The graph evaluator itself lives behind the opaque model kernel; what is
//! carried here is the structure (nodes, links, reachability cleanup) and
//! the lowering into the command tape kernels can interpret.

pub mod build_item;
pub mod graph;

pub use build_item::{BuildItem, BuildItems, Component};
pub use graph::{Model, NodeId, NodeKind};
