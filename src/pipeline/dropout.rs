//! Dropout controllers that perturb the compiled graph between batches and estimators.

use super::filter::SelectedFeatureSet;
use crate::compute::{ComputationError, PrimitiveGraph};
use crate::store::NodeId;
use rand::{Rng, RngCore};

/// Write access to the per-node drop flags of a graph, and nothing else.
pub struct DropoutMask<'a> {
    graph: &'a mut PrimitiveGraph,
}

impl<'a> DropoutMask<'a> {
    pub(crate) fn new(graph: &'a mut PrimitiveGraph) -> Self {
        Self { graph }
    }

    pub fn set_dropped(&mut self, id: NodeId, dropped: bool) -> Result<(), ComputationError> {
        self.graph.set_dropped(id, dropped)
    }

    pub fn is_dropped(&self, id: NodeId) -> bool {
        self.graph.is_dropped(id)
    }

    pub fn clear(&mut self) {
        self.graph.clear_dropped();
    }
}

/// Resamples which graph nodes are dropped.
pub trait DropoutController {
    fn sample(&mut self, mask: &mut DropoutMask<'_>, rng: &mut dyn RngCore) -> Result<(), ComputationError>;
}

/// Keeps each listed node independently with its own probability.
#[derive(Debug, Clone, Default)]
pub struct BernoulliDropout {
    nodes: Vec<(NodeId, f64)>,
}

impl BernoulliDropout {
    /// `nodes` pairs each node with its keep probability.
    pub fn new(nodes: Vec<(NodeId, f64)>) -> Self {
        Self { nodes }
    }

    /// Every selected feature kept with probability `keep`.
    pub fn uniform(selection: &SelectedFeatureSet, keep: f64) -> Self {
        Self::new(selection.iter().map(|f| (f.node, keep)).collect())
    }

    /// Each selected feature kept with its activity probability `|cov * q|`.
    pub fn from_activity(selection: &SelectedFeatureSet) -> Self {
        Self::new(selection.iter().map(|f| (f.node, f.activity.clamp(0.0, 1.0))).collect())
    }

    pub fn nodes(&self) -> &[(NodeId, f64)] {
        &self.nodes
    }
}

impl DropoutController for BernoulliDropout {
    fn sample(&mut self, mask: &mut DropoutMask<'_>, rng: &mut dyn RngCore) -> Result<(), ComputationError> {
        for &(id, keep) in &self.nodes {
            let p = if keep.is_nan() { 0.0 } else { keep.clamp(0.0, 1.0) };
            let kept = rng.gen_bool(p);
            mask.set_dropped(id, !kept)?;
        }
        Ok(())
    }
}

/// Applies the same mask on every call.
#[derive(Debug, Clone, Default)]
pub struct FixedDropout {
    dropped: Vec<NodeId>,
}

impl FixedDropout {
    pub fn new(dropped: Vec<NodeId>) -> Self {
        Self { dropped }
    }
}

impl DropoutController for FixedDropout {
    fn sample(&mut self, mask: &mut DropoutMask<'_>, _rng: &mut dyn RngCore) -> Result<(), ComputationError> {
        mask.clear();
        for &id in &self.dropped {
            mask.set_dropped(id, true)?;
        }
        Ok(())
    }
}
