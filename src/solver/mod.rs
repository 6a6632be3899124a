//! Fits trainable graph parameters with gradient descent.
pub mod optimizer;

pub use optimizer::{Method, Optimizer, StepReport};
