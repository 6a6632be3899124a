//! The primitive graph engine: compilation, evaluation and differentiation.
pub mod bytecode;
pub mod engine;
pub mod graph;
pub mod kernel;
pub mod ledger;

pub use engine::Gradients;
pub use graph::PrimitiveGraph;
pub use ledger::{ComputationError, Ledger};
