//! Pipeline configuration, loadable from JSON with defaults for every field.

use crate::pipeline::{PipelineError, TrainConfig};
use crate::pipeline::filter::DEFAULT_QUALITY_THRESHOLD;
use crate::pipeline::validate::TRANSLATION_TOLERANCE;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Features with `q` at or above this value are selected.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Maximum normalized discrepancy tolerated by the translation check.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Seed for bootstrap and dropout draws; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_quality_threshold() -> f64 { DEFAULT_QUALITY_THRESHOLD }
fn default_tolerance() -> f64 { TRANSLATION_TOLERANCE }
fn default_n_estimators() -> usize { 1 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            tolerance: default_tolerance(),
            train: TrainConfig::default(),
            n_estimators: default_n_estimators(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
