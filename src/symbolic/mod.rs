//! Symbolic feature forest consumed by the pipeline.
pub mod forest;
pub mod node;

pub use forest::{Forest, ForestError, ForestIndex, ForestRecord};
pub use node::{OpTag, SymbolicNode};
