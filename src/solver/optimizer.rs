//! Gradient-descent optimizers driving the primitive graph's parameters.
use crate::compute::{ComputationError, PrimitiveGraph};
use crate::store::NodeId;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Steepest descent: `p -= rate * grad`.
    Steep,
    Adam,
}

impl FromStr for Method {
    type Err = ComputationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steep" => Ok(Method::Steep),
            "adam" => Ok(Method::Adam),
            other => Err(ComputationError::UnknownOptimizer(other.to_string())),
        }
    }
}

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Default)]
struct Moments {
    m: Vec<f64>,
    v: Vec<f64>,
}

/// Loss trace of one `step` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Objective before the first update.
    pub initial_loss: f64,
    /// Objective before the last update.
    pub final_loss: f64,
}

/// Stateful optimizer; Adam moments persist across `step` calls.
#[derive(Debug, Clone)]
pub struct Optimizer {
    method: Method,
    moments: HashMap<NodeId, Moments>,
    t: u64,
}

impl Optimizer {
    pub fn new(method: Method) -> Self {
        Self { method, moments: HashMap::new(), t: 0 }
    }

    pub fn from_name(name: &str) -> Result<Self, ComputationError> {
        Ok(Self::new(name.parse()?))
    }

    pub fn method(&self) -> Method { self.method }

    /// Executes `n_steps` gradient updates of all trainable parameters against `y`.
    ///
    /// Nodes flagged `params_constant` are never touched.
    pub fn step(
        &mut self,
        graph: &mut PrimitiveGraph,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        n_steps: usize,
        rate: f64,
    ) -> Result<StepReport, ComputationError> {
        let trainable = graph.trainable_nodes();
        let mut report = StepReport { initial_loss: f64::NAN, final_loss: f64::NAN };

        for step in 0..n_steps {
            let grads = graph.gradients(x, y)?;
            let loss = graph.loss().unwrap_or(f64::NAN);
            if step == 0 {
                report.initial_loss = loss;
            }
            report.final_loss = loss;

            self.t += 1;
            for &id in &trainable {
                let g = grads.get(id);
                if g.is_empty() {
                    continue;
                }
                match self.method {
                    Method::Steep => {
                        for (p, d) in graph.params_mut(id).iter_mut().zip(g) {
                            *p -= rate * d;
                        }
                    }
                    Method::Adam => {
                        let state = self.moments.entry(id).or_insert_with(|| Moments {
                            m: vec![0.0; g.len()],
                            v: vec![0.0; g.len()],
                        });
                        let bias1 = 1.0 - ADAM_BETA1.powi(self.t as i32);
                        let bias2 = 1.0 - ADAM_BETA2.powi(self.t as i32);
                        let params = graph.params_mut(id);
                        for i in 0..g.len() {
                            state.m[i] = ADAM_BETA1 * state.m[i] + (1.0 - ADAM_BETA1) * g[i];
                            state.v[i] = ADAM_BETA2 * state.v[i] + (1.0 - ADAM_BETA2) * g[i] * g[i];
                            let m_hat = state.m[i] / bias1;
                            let v_hat = state.v[i] / bias2;
                            params[i] -= rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
                        }
                    }
                }
            }
        }

        if !report.final_loss.is_finite() && n_steps > 0 {
            log::warn!("Objective is not finite after {} steps ({})", n_steps, report.final_loss);
        }
        Ok(report)
    }
}
