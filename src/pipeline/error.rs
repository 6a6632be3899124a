use crate::compute::ComputationError;
use crate::symbolic::ForestError;
use thiserror::Error;

/// Failures of the translate/validate/filter/train/predict pipeline.
///
/// Every variant aborts the current invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Node '{expr}' references parent '{parent}' which has no compiled node")]
    UnresolvedParent { expr: String, parent: String },

    #[error("Node '{expr}' carries operator '{op}' which cannot be translated")]
    UnknownOperator { expr: String, op: String },

    #[error("Node '{0}' has no entry in the node mapping")]
    Unmapped(String),

    #[error("Quality predicate selected no features out of {candidates}")]
    EmptySelection { candidates: usize },

    #[error("Translation mismatch at '{expr}': normalized discrepancy {discrepancy:e}")]
    TranslationMismatch { expr: String, discrepancy: f64 },

    #[error("Node '{0}' is already bound in the node mapping")]
    DuplicateBinding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Forest(#[from] ForestError),

    #[error(transparent)]
    Engine(#[from] ComputationError),
}
