//! Quality-driven pruning of the compiled graph and output/objective assembly.

use super::error::PipelineError;
use super::translate::{translate, NodeMapping};
use super::validate::check_translation_with_tolerance;
use crate::analysis::{topology, TelemetryReport};
use crate::compute::PrimitiveGraph;
use crate::config::PipelineConfig;
use crate::store::NodeId;
use crate::symbolic::{Forest, ForestIndex, SymbolicNode};
use ndarray::ArrayView2;

/// Default quality threshold for feature selection.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.99;

/// Predicate selecting nodes with `q >= threshold`.
pub fn quality_at_least(threshold: f64) -> impl Fn(&SymbolicNode) -> bool {
    move |node| node.q >= threshold
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFeature {
    pub expr: String,
    pub forest_index: ForestIndex,
    /// Mapped graph node feeding the output.
    pub node: NodeId,
    pub q: f64,
    pub cov: f64,
    /// `|cov * q|`
    pub activity: f64,
    /// Initial output weight, `+-1/k` by the sign of `cov`.
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedFeatureSet {
    features: Vec<SelectedFeature>,
}

impl SelectedFeatureSet {
    pub fn len(&self) -> usize { self.features.len() }
    pub fn is_empty(&self) -> bool { self.features.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, SelectedFeature> { self.features.iter() }
    pub fn nodes(&self) -> Vec<NodeId> { self.features.iter().map(|f| f.node).collect() }
}

/// Diagnostics of one filter pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStats {
    pub n_selected: usize,
    pub n_candidates: usize,
    /// Nodes in the branch closure of the selection, output wiring excluded.
    pub n_active: usize,
    pub min_activity: f64,
    pub max_activity: f64,
}

/// Pruned graph with a single output, target and objective.
///
/// Topology is fixed once built; training only mutates parameters.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    graph: PrimitiveGraph,
    mapping: NodeMapping,
    selection: SelectedFeatureSet,
    stats: FilterStats,
    output: NodeId,
    target: NodeId,
    objective: NodeId,
}

impl CompiledModel {
    /// Translates, validates and filters `forest` with the thresholds of `config`.
    pub fn compile(forest: &Forest, x: ArrayView2<f64>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let (mut graph, mapping) = translate(forest)?;
        check_translation_with_tolerance(forest, &mut graph, &mapping, x, config.tolerance)?;
        filter_graph(forest, graph, mapping, quality_at_least(config.quality_threshold))
    }

    pub fn graph(&self) -> &PrimitiveGraph { &self.graph }
    pub(crate) fn graph_mut(&mut self) -> &mut PrimitiveGraph { &mut self.graph }
    pub fn mapping(&self) -> &NodeMapping { &self.mapping }
    pub fn selection(&self) -> &SelectedFeatureSet { &self.selection }
    pub fn stats(&self) -> FilterStats { self.stats }
    pub fn output(&self) -> NodeId { self.output }
    pub fn target(&self) -> NodeId { self.target }
    pub fn objective(&self) -> NodeId { self.objective }

    pub fn telemetry(&self) -> TelemetryReport {
        self.graph.telemetry()
    }
}

/// Keeps only the ancestry of nodes matching `predicate` and wires a linear
/// output, a target and an MSE objective over them.
pub fn filter_graph(
    forest: &Forest,
    mut graph: PrimitiveGraph,
    mapping: NodeMapping,
    predicate: impl Fn(&SymbolicNode) -> bool,
) -> Result<CompiledModel, PipelineError> {
    let mut picked: Vec<(ForestIndex, &SymbolicNode, NodeId)> = Vec::new();
    for (idx, node) in forest.iter().filter(|(_, n)| predicate(n)) {
        let cnode = mapping.get_index(idx).ok_or_else(|| PipelineError::Unmapped(node.expr.clone()))?;
        picked.push((idx, node, cnode));
    }
    if picked.is_empty() {
        return Err(PipelineError::EmptySelection { candidates: forest.len() });
    }

    // Branch closure first, then flip the whole activation state at once.
    let roots: Vec<NodeId> = picked.iter().map(|(_, _, c)| *c).collect();
    let keep = topology::upstream_from(graph.registry(), &roots);
    graph.apply_activation(&keep);
    let n_active = keep.len();

    let k = picked.len() as f64;
    let features: Vec<SelectedFeature> = picked
        .iter()
        .map(|&(idx, node, cnode)| SelectedFeature {
            expr: node.expr.clone(),
            forest_index: idx,
            node: cnode,
            q: node.q,
            cov: node.cov,
            activity: node.activity_probability(),
            weight: if node.cov > 0.0 { 1.0 / k } else { -1.0 / k },
        })
        .collect();

    let output = graph.add_output(&roots, "output")?;
    let mut weights: Vec<f64> = features.iter().map(|f| f.weight).collect();
    weights.push(0.0);
    graph.set_params(output, weights)?;
    let target = graph.add_target("target");
    let objective = graph.add_objective(output, target, "objective")?;
    graph.bypass_inactive_nodes()?;

    let (min_activity, max_activity) = features
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| (lo.min(f.activity), hi.max(f.activity)));
    let stats = FilterStats {
        n_selected: features.len(),
        n_candidates: forest.len(),
        n_active,
        min_activity,
        max_activity,
    };

    log::info!("Selected {} / {} output nodes", stats.n_selected, stats.n_candidates);
    log::info!("Total # active nodes: {}", stats.n_active);
    log::info!("Activity probabilities vary between {:.4} and {:.4}", min_activity, max_activity);
    log::info!("Output node of type '{}'", graph.op(output)?.name());

    Ok(CompiledModel {
        graph,
        mapping,
        selection: SelectedFeatureSet { features },
        stats,
        output,
        target,
        objective,
    })
}
