//! Batched training of a compiled model.

use super::dropout::{DropoutController, DropoutMask};
use super::error::PipelineError;
use super::filter::CompiledModel;
use crate::solver::{Optimizer, StepReport};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Optimizer method name, `steep` or `adam`.
    pub method: String,
    pub rate: f64,
    pub n_steps_batch: usize,
    pub n_batches: usize,
    /// Bootstrap-resample the rows of every batch.
    pub resample: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            method: "steep".to_string(),
            rate: 0.001,
            n_steps_batch: 100,
            n_batches: 1,
            resample: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// Loss trace of every batch, in order.
    pub batches: Vec<StepReport>,
    pub elapsed: Duration,
}

/// `n` row indices drawn uniformly from `[0, n)` with replacement.
pub fn bootstrap_indices<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

/// Fits every trainable parameter of `model` against `y`.
///
/// Batches run sequentially on the shared parameters. When present, the dropout
/// controller is resampled once per batch; the mask is cleared afterwards.
pub fn optimize<R: Rng>(
    model: &mut CompiledModel,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &TrainConfig,
    mut dropout: Option<&mut dyn DropoutController>,
    rng: &mut R,
) -> Result<TrainReport, PipelineError> {
    let mut optimizer = Optimizer::from_name(&config.method).map_err(|e| PipelineError::Config(e.to_string()))?;
    if x.nrows() != y.len() {
        return Err(PipelineError::Config(format!(
            "Feature matrix has {} rows but target has {}",
            x.nrows(),
            y.len()
        )));
    }

    let n = x.nrows();
    let t0 = Instant::now();
    let mut report = TrainReport::default();

    for i in 0..config.n_batches {
        let resampled = config.resample.then(|| {
            let rows = bootstrap_indices(n, rng);
            (x.select(Axis(0), &rows), y.select(Axis(0), &rows))
        });
        let (xb, yb) = match &resampled {
            Some((xs, ys)) => (xs.view(), ys.view()),
            None => (x.view(), y.view()),
        };

        if let Some(ctl) = dropout.as_deref_mut() {
            ctl.sample(&mut DropoutMask::new(model.graph_mut()), rng)?;
        }

        let step = optimizer.step(model.graph_mut(), xb, yb, config.n_steps_batch, config.rate);
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                model.graph_mut().clear_dropped();
                return Err(e.into());
            }
        };
        log::debug!("Batch {:3}  loss {:+1.4e} -> {:+1.4e}", i, step.initial_loss, step.final_loss);
        report.batches.push(step);
    }

    if dropout.is_some() {
        model.graph_mut().clear_dropped();
    }
    report.elapsed = t0.elapsed();
    log::info!("Time taken for optimization: {:.4}s", report.elapsed.as_secs_f64());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputationError;
    use crate::pipeline::dropout::FixedDropout;
    use crate::pipeline::filter::{filter_graph, quality_at_least};
    use crate::pipeline::translate::translate;
    use crate::store::Op;
    use crate::symbolic::{Forest, OpTag};
    use ndarray::{array, Array1, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn reciprocal_model() -> CompiledModel {
        let mut f = Forest::new();
        let a = f.add_root("a", 1.0, 1.0).unwrap();
        let r = f.add_node("1/a", OpTag::Reciprocal, &[a]).unwrap();
        f.set_scores(r, 1.0, 0.8).unwrap();
        let (g, m) = translate(&f).unwrap();
        filter_graph(&f, g, m, quality_at_least(0.99)).unwrap()
    }

    #[derive(Default)]
    struct CountingDropout {
        samples: usize,
    }

    impl DropoutController for CountingDropout {
        fn sample(&mut self, _: &mut DropoutMask<'_>, _: &mut dyn rand::RngCore) -> Result<(), ComputationError> {
            self.samples += 1;
            Ok(())
        }
    }

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![[1.0], [2.0], [4.0], [5.0]];
        let y = x.column(0).mapv(|v| 2.0 / v + 0.5);
        (x, y)
    }

    #[test]
    fn test_bootstrap_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        for n in [1usize, 2, 17, 100] {
            let idx = bootstrap_indices(n, &mut rng);
            assert_eq!(idx.len(), n);
            assert!(idx.iter().all(|&i| i < n));
        }
        assert!(bootstrap_indices(0, &mut rng).is_empty());
    }

    #[test]
    fn test_constant_parameters_survive_training() {
        let mut model = reciprocal_model();
        let (x, y) = data();
        let pow = model.selection().nodes()[0];
        let root = model.mapping().get("a").unwrap();
        let config = TrainConfig { rate: 0.005, n_steps_batch: 50, n_batches: 4, resample: true, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);

        let report = optimize(&mut model, x.view(), y.view(), &config, None, &mut rng).unwrap();

        assert_eq!(report.batches.len(), 4);
        let g = model.graph();
        assert_eq!(g.op(pow).unwrap(), Op::Pow);
        assert_eq!(g.params(pow).unwrap(), &[-1.0]);
        assert!(g.is_params_constant(pow));
        assert_eq!(g.params(root).unwrap(), &[1.0, 0.0]);
        assert_ne!(g.params(model.output()).unwrap(), &[1.0, 0.0]);
    }

    #[test]
    fn test_loss_decreases_without_resampling() {
        let mut model = reciprocal_model();
        let (x, y) = data();
        let config = TrainConfig { rate: 0.002, n_steps_batch: 100, n_batches: 2, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);

        let report = optimize(&mut model, x.view(), y.view(), &config, None, &mut rng).unwrap();
        let first = report.batches[0].initial_loss;
        let last = report.batches[1].final_loss;
        assert!(last < first, "{} !< {}", last, first);
    }

    #[test]
    fn test_dropout_mask_is_cleared_after_training() {
        let mut model = reciprocal_model();
        let (x, y) = data();
        let feature = model.selection().nodes()[0];
        let mut ctl = FixedDropout::new(vec![feature]);
        let config = TrainConfig { n_steps_batch: 5, n_batches: 2, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);

        optimize(&mut model, x.view(), y.view(), &config, Some(&mut ctl), &mut rng).unwrap();
        assert!(!model.graph().is_dropped(feature));
    }

    #[test]
    fn test_mask_is_resampled_once_per_batch() {
        let mut model = reciprocal_model();
        let (x, y) = data();
        let mut ctl = CountingDropout::default();
        let config = TrainConfig { n_steps_batch: 7, n_batches: 3, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);

        optimize(&mut model, x.view(), y.view(), &config, Some(&mut ctl), &mut rng).unwrap();
        assert_eq!(ctl.samples, 3);
    }

    #[test]
    fn test_unknown_method_is_a_config_error() {
        let mut model = reciprocal_model();
        let (x, y) = data();
        let config = TrainConfig { method: "newton".into(), ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);
        let err = optimize(&mut model, x.view(), y.view(), &config, None, &mut rng).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
