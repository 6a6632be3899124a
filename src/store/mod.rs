//! Columnar storage for primitive graph nodes.
pub mod registry;
pub mod types;

pub use registry::Registry;
pub use types::{NodeId, NodeMetadata, Op};
