// Symbolic feature-graph compiler and trainer.
// The optional `python` feature exposes the pipeline as the `_core` Python module.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod pipeline;
pub mod solver;
pub mod store;
pub mod symbolic;

#[cfg(feature = "python")]
pub mod bindings {
    pub mod python;
}

pub use compute::{ComputationError, PrimitiveGraph};
pub use config::PipelineConfig;
pub use pipeline::{CompiledModel, NodeMapping, PipelineError};
pub use symbolic::{Forest, OpTag, SymbolicNode};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Defines the `_core` Python module.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<bindings::python::PyForest>()?;
    m.add_class::<bindings::python::PyCompiledModel>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
