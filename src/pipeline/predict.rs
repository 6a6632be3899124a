//! Dropout-ensemble prediction.

use super::dropout::{DropoutController, DropoutMask};
use super::error::PipelineError;
use super::filter::CompiledModel;
use crate::compute::ComputationError;
use ndarray::{Array1, ArrayView2};
use rand::Rng;
use std::time::Instant;

/// Averages the output over `n_estimators` forward passes, resampling the
/// dropout mask before each one.
pub fn predict<R: Rng>(
    model: &mut CompiledModel,
    mut dropout: Option<&mut dyn DropoutController>,
    x: ArrayView2<f64>,
    n_estimators: usize,
    rng: &mut R,
) -> Result<Array1<f64>, PipelineError> {
    if n_estimators == 0 {
        return Err(PipelineError::Config("n_estimators must be at least 1".to_string()));
    }

    let t0 = Instant::now();
    let result = accumulate(model, dropout.as_deref_mut(), x, n_estimators, rng);
    if dropout.is_some() {
        model.graph_mut().clear_dropped();
    }
    let sum = result?;

    log::info!("Time taken for prediction: {:.4}s", t0.elapsed().as_secs_f64());
    Ok(sum / n_estimators as f64)
}

fn accumulate<'c, R: Rng>(
    model: &mut CompiledModel,
    mut dropout: Option<&mut (dyn DropoutController + 'c)>,
    x: ArrayView2<f64>,
    n_estimators: usize,
    rng: &mut R,
) -> Result<Array1<f64>, PipelineError> {
    let output = model.output();
    let mut sum = Array1::<f64>::zeros(x.nrows());

    for _ in 0..n_estimators {
        if let Some(ctl) = dropout.as_deref_mut() {
            ctl.sample(&mut DropoutMask::new(model.graph_mut()), rng)?;
        }
        model.graph_mut().evaluate(x)?;
        let vals = model.graph().vals(output).ok_or_else(|| ComputationError::Mismatch {
            msg: "Output node produced no values".to_string(),
        })?;
        sum.iter_mut().zip(vals).for_each(|(s, v)| *s += v);
    }
    Ok(sum)
}
