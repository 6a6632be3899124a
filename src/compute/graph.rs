//! The primitive graph engine facade.
//!
//! Owns node storage, parameters and activation state, compiles the active part
//! of the graph into a [`Program`] and runs forward/backward passes over it.

use crate::analysis::{topology, TelemetryReport};
use crate::compute::bytecode::{Compiler, Program};
use crate::compute::engine::{Engine, Gradients};
use crate::compute::ledger::{ComputationError, Ledger};
use crate::store::{NodeId, NodeMetadata, Op, Registry};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimitiveGraph {
    registry: Registry,
    n_inputs: u32,
    outputs: Vec<NodeId>,
    targets: Vec<NodeId>,
    objectives: Vec<NodeId>,

    // Execution state, rebuilt on demand.
    #[serde(skip)]
    program: Option<Program>,
    #[serde(skip)]
    ledger: Ledger,
    #[serde(skip)]
    grads: Ledger,
}

impl PrimitiveGraph {
    pub fn new() -> Self { Self::default() }

    pub fn node_count(&self) -> usize { self.registry.count() }
    pub fn input_count(&self) -> usize { self.n_inputs as usize }
    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn outputs(&self) -> &[NodeId] { &self.outputs }
    pub fn targets(&self) -> &[NodeId] { &self.targets }
    pub fn objectives(&self) -> &[NodeId] { &self.objectives }

    // --- Construction ---

    /// Adds an input node reading the next unused column of the feature matrix.
    pub fn add_input(&mut self, name: impl Into<String>) -> NodeId {
        let column = self.n_inputs;
        self.n_inputs += 1;
        self.push(Op::Input { column }, &[], name)
    }

    /// Adds an intermediate node (`linear`, `exp`, `log`, `mod`, `pow`, `div`, `mult`).
    pub fn add_node(&mut self, op: Op, parents: &[NodeId], name: impl Into<String>) -> Result<NodeId, ComputationError> {
        let name = name.into();
        match op {
            Op::Input { .. } | Op::Output | Op::Target | Op::Objective => {
                return Err(ComputationError::Mismatch {
                    msg: format!("'{}' nodes have dedicated constructors (node '{}')", op.name(), name),
                });
            }
            _ => {}
        }
        self.check_parents(op, parents, &name)?;
        Ok(self.push(op, parents, name))
    }

    /// Adds a linear output node over `parents`.
    pub fn add_output(&mut self, parents: &[NodeId], name: impl Into<String>) -> Result<NodeId, ComputationError> {
        let name = name.into();
        self.check_parents(Op::Output, parents, &name)?;
        let id = self.push(Op::Output, parents, name);
        self.outputs.push(id);
        Ok(id)
    }

    pub fn add_target(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.push(Op::Target, &[], name);
        self.targets.push(id);
        id
    }

    /// Adds a mean-squared-error objective between `output` and `target`.
    pub fn add_objective(&mut self, output: NodeId, target: NodeId, name: impl Into<String>) -> Result<NodeId, ComputationError> {
        let name = name.into();
        self.check_parents(Op::Objective, &[output, target], &name)?;
        let id = self.push(Op::Objective, &[output, target], name);
        self.objectives.push(id);
        Ok(id)
    }

    fn push(&mut self, op: Op, parents: &[NodeId], name: impl Into<String>) -> NodeId {
        self.program = None;
        self.registry.add_node(op, parents, NodeMetadata::named(name))
    }

    fn check_parents(&self, op: Op, parents: &[NodeId], name: &str) -> Result<(), ComputationError> {
        for p in parents {
            self.check_id(*p)?;
        }
        let ok = match op.arity() {
            Some(n) => parents.len() == n,
            None => !parents.is_empty(),
        };
        if !ok {
            return Err(ComputationError::ArityMismatch {
                node_name: name.to_string(),
                op: op.name(),
                expected: op.arity().unwrap_or(1),
                actual: parents.len(),
            });
        }
        Ok(())
    }

    fn check_id(&self, id: NodeId) -> Result<(), ComputationError> {
        if self.registry.contains(id) { Ok(()) } else { Err(ComputationError::UnknownNode(id.0)) }
    }

    // --- Node state ---

    pub fn op(&self, id: NodeId) -> Result<Op, ComputationError> {
        self.check_id(id)?;
        Ok(self.registry.ops[id.index()])
    }

    pub fn name(&self, id: NodeId) -> Result<&str, ComputationError> {
        self.check_id(id)?;
        Ok(&self.registry.meta[id.index()].name)
    }

    pub fn parents(&self, id: NodeId) -> Result<&[NodeId], ComputationError> {
        self.check_id(id)?;
        Ok(self.registry.get_parents(id))
    }

    pub fn params(&self, id: NodeId) -> Result<&[f64], ComputationError> {
        self.check_id(id)?;
        Ok(&self.registry.params[id.index()])
    }

    pub fn set_params(&mut self, id: NodeId, params: Vec<f64>) -> Result<(), ComputationError> {
        self.check_id(id)?;
        let idx = id.index();
        let expected = self.registry.ops[idx].param_count(self.registry.get_parents(id).len());
        if params.len() != expected {
            return Err(ComputationError::ParamCount {
                node_name: self.registry.meta[idx].name.clone(),
                expected,
                actual: params.len(),
            });
        }
        self.registry.params[idx] = params;
        Ok(())
    }

    pub(crate) fn params_mut(&mut self, id: NodeId) -> &mut [f64] {
        &mut self.registry.params[id.index()]
    }

    pub fn set_params_constant(&mut self, id: NodeId, constant: bool) -> Result<(), ComputationError> {
        self.check_id(id)?;
        self.registry.params_constant[id.index()] = constant;
        Ok(())
    }

    pub fn is_params_constant(&self, id: NodeId) -> bool {
        self.registry.params_constant.get(id.index()).copied().unwrap_or(false)
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.registry.active.get(id.index()).copied().unwrap_or(false)
    }

    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<(), ComputationError> {
        self.check_id(id)?;
        self.registry.active[id.index()] = active;
        self.program = None;
        Ok(())
    }

    pub fn set_all_active(&mut self, active: bool) {
        self.registry.active.iter_mut().for_each(|a| *a = active);
        self.program = None;
    }

    /// Marks `id` and every node it transitively depends on as active.
    /// Returns the size of the branch.
    pub fn set_branch_active(&mut self, id: NodeId) -> Result<usize, ComputationError> {
        self.check_id(id)?;
        let branch = topology::upstream_from(&self.registry, &[id]);
        for node in &branch {
            self.registry.active[node.index()] = true;
        }
        self.program = None;
        Ok(branch.len())
    }

    /// Activates exactly the nodes in `keep` and deactivates the complement.
    pub fn apply_activation(&mut self, keep: &HashSet<NodeId>) {
        for (i, active) in self.registry.active.iter_mut().enumerate() {
            *active = keep.contains(&NodeId::new(i));
        }
        self.program = None;
    }

    /// Recompiles the execution program so that inactive nodes are skipped by
    /// every subsequent forward and backward pass. Returns the active node count.
    pub fn bypass_inactive_nodes(&mut self) -> Result<usize, ComputationError> {
        let program = Compiler::new(&self.registry).compile()?;
        let n = program.len();
        self.program = Some(program);
        self.ledger = Ledger::new();
        Ok(n)
    }

    pub fn is_dropped(&self, id: NodeId) -> bool {
        self.registry.dropped.get(id.index()).copied().unwrap_or(false)
    }

    pub fn set_dropped(&mut self, id: NodeId, dropped: bool) -> Result<(), ComputationError> {
        self.check_id(id)?;
        self.registry.dropped[id.index()] = dropped;
        Ok(())
    }

    /// Restores every node to its undropped state.
    pub fn clear_dropped(&mut self) {
        self.registry.dropped.iter_mut().for_each(|d| *d = false);
    }

    /// Active nodes whose parameters the optimizer may update.
    pub fn trainable_nodes(&self) -> Vec<NodeId> {
        (0..self.registry.count())
            .map(NodeId::new)
            .filter(|id| {
                let i = id.index();
                self.registry.active[i] && !self.registry.params_constant[i] && !self.registry.params[i].is_empty()
            })
            .collect()
    }

    pub fn telemetry(&self) -> TelemetryReport {
        TelemetryReport::analyze(&self.registry)
    }

    // --- Evaluation ---

    /// Runs a forward pass, compiling the program first if the graph changed.
    fn run_forward(&mut self, x: ArrayView2<f64>, target: Option<ArrayView1<f64>>) -> Result<Program, ComputationError> {
        let program = match self.program.take() {
            Some(program) => program,
            None => Compiler::new(&self.registry).compile()?,
        };
        Engine::forward(&self.registry, &program, &mut self.ledger, x, target)?;
        Ok(program)
    }

    /// Evaluates all active nodes over the rows of `x`.
    pub fn evaluate(&mut self, x: ArrayView2<f64>) -> Result<(), ComputationError> {
        let program = self.run_forward(x, None)?;
        self.program = Some(program);
        Ok(())
    }

    /// Evaluates all active nodes, seeding target nodes with `y`.
    pub fn evaluate_with_target(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ComputationError> {
        let program = self.run_forward(x, Some(y))?;
        self.program = Some(program);
        Ok(())
    }

    /// Values of `id` from the last evaluation; `None` for bypassed nodes.
    pub fn vals(&self, id: NodeId) -> Option<&[f64]> {
        let program = self.program.as_ref()?;
        let slot = program.slot_of(id)?;
        if slot >= self.ledger.n_slots() {
            return None;
        }
        Some(self.ledger.slot(slot))
    }

    /// Mean objective value of the last evaluation with a target.
    pub fn loss(&self) -> Option<f64> {
        let program = self.program.as_ref()?;
        Engine::loss(program, &self.ledger, *self.objectives.first()?)
    }

    /// Forward pass against `y` followed by a backward pass from the objective.
    pub fn gradients(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Gradients, ComputationError> {
        let objective = *self.objectives.first().ok_or(ComputationError::NoObjective)?;
        let program = self.run_forward(x, Some(y))?;
        let result = Engine::backward(&self.registry, &program, &self.ledger, &mut self.grads, objective);
        self.program = Some(program);
        result
    }

    // --- Persistence ---

    pub fn to_json(&self) -> Result<String, ComputationError> {
        serde_json::to_string(self).map_err(|e| ComputationError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ComputationError> {
        let mut graph: Self = serde_json::from_str(json)
            .map_err(|e| ComputationError::Serialization(e.to_string()))?;
        graph.registry.rebuild_name_cache();
        Ok(graph)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ComputationError> {
        std::fs::write(path, self.to_json()?).map_err(|e| ComputationError::Serialization(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ComputationError> {
        let json = std::fs::read_to_string(path).map_err(|e| ComputationError::Serialization(e.to_string()))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_arity_is_enforced() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let err = g.add_node(Op::Div, &[a], "d").unwrap_err();
        assert!(matches!(err, ComputationError::ArityMismatch { expected: 2, actual: 1, .. }));
        assert!(g.add_node(Op::Linear, &[], "l").is_err());
        assert!(g.add_node(Op::Exp, &[NodeId::new(9)], "e").is_err());
    }

    #[test]
    fn test_param_count_is_enforced() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let l = g.add_node(Op::Linear, &[a], "l").unwrap();
        assert!(g.set_params(l, vec![1.0]).is_err());
        g.set_params(l, vec![3.0, 1.0]).unwrap();
        assert_eq!(g.params(l).unwrap(), &[3.0, 1.0]);
    }

    #[test]
    fn test_inputs_take_consecutive_columns() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let b = g.add_input("b");
        g.evaluate(array![[1.0, 2.0], [3.0, 4.0]].view()).unwrap();
        assert_eq!(g.vals(a).unwrap(), &[1.0, 3.0]);
        assert_eq!(g.vals(b).unwrap(), &[2.0, 4.0]);
    }

    #[test]
    fn test_branch_activation_and_bypass() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let la = g.add_node(Op::Linear, &[a], "la").unwrap();
        let e = g.add_node(Op::Exp, &[la], "e").unwrap();
        let m = g.add_node(Op::Mod, &[la], "m").unwrap();

        g.set_all_active(false);
        assert_eq!(g.set_branch_active(e).unwrap(), 3);
        assert_eq!(g.bypass_inactive_nodes().unwrap(), 3);

        g.evaluate(array![[-1.0]].view()).unwrap();
        assert!(g.vals(e).is_some());
        assert!(g.vals(m).is_none());
        assert!(!g.is_active(m));
    }

    #[test]
    fn test_json_round_trip_preserves_state() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let p = g.add_node(Op::Pow, &[a], "p").unwrap();
        g.set_params(p, vec![-1.0]).unwrap();
        g.set_params_constant(p, true).unwrap();

        let restored = PrimitiveGraph::from_json(&g.to_json().unwrap()).unwrap();
        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.params(p).unwrap(), &[-1.0]);
        assert!(restored.is_params_constant(p));
        assert_eq!(restored.name(p).unwrap(), "p");
    }

    #[test]
    fn test_json_round_trip_is_bit_exact() {
        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let mut nodes = Vec::new();
        for i in 0..200u32 {
            let l = g.add_node(Op::Linear, &[a], "l").unwrap();
            let w = 1.0 + (i as f64).sqrt() / 7.0 + 1.0 / 3.0;
            g.set_params(l, vec![w, -w / 13.0]).unwrap();
            nodes.push(l);
        }
        g.set_params(nodes[0], vec![1.8287696323621496, 0.1]).unwrap();

        let restored = PrimitiveGraph::from_json(&g.to_json().unwrap()).unwrap();
        for &l in &nodes {
            let want: Vec<u64> = g.params(l).unwrap().iter().map(|v| v.to_bits()).collect();
            let got: Vec<u64> = restored.params(l).unwrap().iter().map(|v| v.to_bits()).collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let mut g = PrimitiveGraph::new();
        let a = g.add_input("a");
        let out = g.add_output(&[a], "out").unwrap();
        let t = g.add_target("t");
        g.add_objective(out, t, "obj").unwrap();
        g.save(&path).unwrap();

        let mut restored = PrimitiveGraph::load(&path).unwrap();
        assert_eq!(restored.outputs(), &[out]);
        restored.evaluate_with_target(array![[2.0]].view(), array![1.0].view()).unwrap();
        assert_eq!(restored.loss(), Some(1.0));
    }
}
