use crate::compute::bytecode::Program;
use crate::compute::kernel;
use crate::compute::ledger::{ComputationError, Ledger};
use crate::store::{NodeId, Op, Registry};
use ndarray::{ArrayView1, ArrayView2};
use smallvec::SmallVec;

/// Parameter gradients indexed by `NodeId`; empty for nodes without parameters
/// or outside the program.
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    pub params: Vec<Vec<f64>>,
}

impl Gradients {
    pub fn get(&self, id: NodeId) -> &[f64] {
        self.params.get(id.index()).map(|g| g.as_slice()).unwrap_or(&[])
    }
}

pub struct Engine;

impl Engine {
    /// Evaluates every instruction of the program over the rows of `x`.
    ///
    /// `target` seeds `Target` nodes; without it targets and objectives stay zero.
    pub fn forward(
        registry: &Registry,
        program: &Program,
        ledger: &mut Ledger,
        x: ArrayView2<f64>,
        target: Option<ArrayView1<f64>>,
    ) -> Result<(), ComputationError> {
        let n_rows = x.nrows();
        Self::validate_inputs(registry, program, x, target)?;
        ledger.resize(program.len(), n_rows);

        for (i, &id) in program.order.iter().enumerate() {
            let op = registry.ops[id.index()];
            let (before, rest) = ledger.split_at_slot_mut(i);
            let dest = &mut rest[..n_rows];

            match op {
                Op::Input { column } => {
                    for (d, &v) in dest.iter_mut().zip(x.column(column as usize)) {
                        *d = v;
                    }
                }
                Op::Target => match target {
                    Some(y) => {
                        for (d, &v) in dest.iter_mut().zip(y) {
                            *d = v;
                        }
                    }
                    None => dest.fill(0.0),
                },
                Op::Objective if target.is_none() => dest.fill(0.0),
                _ => {
                    let srcs: SmallVec<[&[f64]; 4]> = program
                        .parents_of(i)
                        .iter()
                        .map(|&s| &before[s as usize * n_rows..(s as usize + 1) * n_rows])
                        .collect();
                    kernel::forward(op, &registry.params[id.index()], &srcs, dest);
                }
            }

            if registry.dropped[id.index()] {
                dest.fill(0.0);
            }
        }
        Ok(())
    }

    /// Reverse-mode pass from `objective`, whose loss is the mean over rows.
    ///
    /// Requires a preceding `forward` with a target on the same program.
    pub fn backward(
        registry: &Registry,
        program: &Program,
        ledger: &Ledger,
        grads: &mut Ledger,
        objective: NodeId,
    ) -> Result<Gradients, ComputationError> {
        let n_rows = ledger.n_rows();
        let obj_slot = program.slot_of(objective).ok_or(ComputationError::NoObjective)?;
        if ledger.n_slots() != program.len() {
            return Err(ComputationError::Mismatch {
                msg: format!("Ledger holds {} slots, program has {}", ledger.n_slots(), program.len()),
            });
        }

        grads.resize(program.len(), n_rows);
        if n_rows > 0 {
            grads.slot_mut(obj_slot).fill(1.0 / n_rows as f64);
        }

        let mut out = Gradients { params: vec![Vec::new(); registry.count()] };

        for i in (0..=obj_slot).rev() {
            let id = program.order[i];
            if registry.dropped[id.index()] {
                continue;
            }
            let op = registry.ops[id.index()];
            let params = &registry.params[id.index()];
            let parents = program.parents_of(i);

            let (lower, upper) = grads.split_at_slot_mut(i);
            let grad = &upper[..n_rows];
            if parents.is_empty() && params.is_empty() {
                continue;
            }
            if grad.iter().all(|&g| g == 0.0) {
                continue;
            }

            let srcs: SmallVec<[&[f64]; 4]> = parents.iter().map(|&s| ledger.slot(s as usize)).collect();
            let mut dsrcs = vec![vec![0.0; n_rows]; parents.len()];
            let mut dparams = vec![0.0; params.len()];
            kernel::backward(op, params, &srcs, ledger.slot(i), grad, &mut dsrcs, &mut dparams);

            for (&s, d) in parents.iter().zip(&dsrcs) {
                let s = s as usize;
                kernel::axpy(&mut lower[s * n_rows..(s + 1) * n_rows], 1.0, d);
            }
            out.params[id.index()] = dparams;
        }
        Ok(out)
    }

    /// Mean of the objective column.
    pub fn loss(program: &Program, ledger: &Ledger, objective: NodeId) -> Option<f64> {
        let slot = program.slot_of(objective)?;
        if slot >= ledger.n_slots() || ledger.n_rows() == 0 {
            return None;
        }
        let col = ledger.slot(slot);
        Some(col.iter().sum::<f64>() / col.len() as f64)
    }

    /// Performs shape checking before execution starts.
    fn validate_inputs(
        registry: &Registry,
        program: &Program,
        x: ArrayView2<f64>,
        target: Option<ArrayView1<f64>>,
    ) -> Result<(), ComputationError> {
        if let Some(y) = target {
            if y.len() != x.nrows() {
                return Err(ComputationError::Mismatch {
                    msg: format!("Target has {} rows, input has {}", y.len(), x.nrows()),
                });
            }
        }
        for &id in &program.order {
            if let Op::Input { column } = registry.ops[id.index()] {
                if column as usize >= x.ncols() {
                    return Err(ComputationError::Mismatch {
                        msg: format!("Input node '{}' reads column {} but input has {} columns",
                            registry.meta[id.index()].name, column, x.ncols()),
                    });
                }
            }
        }
        Ok(())
    }
}
