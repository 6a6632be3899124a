//! The compile-and-train pipeline: translate, validate, filter, train, predict.
pub mod dropout;
pub mod error;
pub mod filter;
pub mod predict;
pub mod train;
pub mod translate;
pub mod validate;

pub use dropout::{BernoulliDropout, DropoutController, DropoutMask, FixedDropout};
pub use error::PipelineError;
pub use filter::{filter_graph, quality_at_least, CompiledModel, FilterStats, SelectedFeature, SelectedFeatureSet};
pub use predict::predict;
pub use train::{bootstrap_indices, optimize, TrainConfig, TrainReport};
pub use translate::{translate, NodeMapping};
pub use validate::{check_translation, check_translation_with_tolerance, normalized_discrepancy, ValidationReport};
