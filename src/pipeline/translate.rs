//! Lowers a symbolic forest into chains of parameterized primitive nodes.

use super::error::PipelineError;
use crate::compute::PrimitiveGraph;
use crate::store::{NodeId, Op};
use crate::symbolic::{Forest, ForestIndex, OpTag, SymbolicNode};
use std::collections::HashMap;

/// Association from each symbolic node to the terminal graph node of its chain.
///
/// Entries are only ever appended during translation; consumers get a read-only view.
#[derive(Debug, Clone, Default)]
pub struct NodeMapping {
    by_expr: HashMap<String, NodeId>,
    by_index: HashMap<ForestIndex, NodeId>,
}

impl NodeMapping {
    pub fn len(&self) -> usize { self.by_expr.len() }
    pub fn is_empty(&self) -> bool { self.by_expr.is_empty() }

    pub fn get(&self, expr: &str) -> Option<NodeId> {
        self.by_expr.get(expr).copied()
    }

    pub fn get_index(&self, idx: ForestIndex) -> Option<NodeId> {
        self.by_index.get(&idx).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.by_expr.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub(crate) fn bind(&mut self, idx: ForestIndex, expr: &str, node: NodeId) -> Result<(), PipelineError> {
        if self.by_expr.contains_key(expr) || self.by_index.contains_key(&idx) {
            return Err(PipelineError::DuplicateBinding(expr.to_string()));
        }
        self.by_expr.insert(expr.to_string(), node);
        self.by_index.insert(idx, node);
        Ok(())
    }
}

/// Translates every node of `forest`, in forest order, into a fresh graph.
pub fn translate(forest: &Forest) -> Result<(PrimitiveGraph, NodeMapping), PipelineError> {
    let mut graph = PrimitiveGraph::new();
    let mut mapping = NodeMapping::default();
    let total = forest.len();

    for (i, (idx, node)) in forest.iter().enumerate() {
        log::debug!("Converting node {}/{}: {}", i + 1, total, node.expr);
        let inputs = resolve_parents(forest, &mapping, node)?;
        let terminal = lower(&mut graph, node, &inputs)?;
        mapping.bind(idx, &node.expr, terminal)?;
    }

    log::info!("Created graph with {} nodes from {} symbolic nodes", graph.node_count(), total);
    Ok((graph, mapping))
}

fn resolve_parents(forest: &Forest, mapping: &NodeMapping, node: &SymbolicNode) -> Result<Vec<NodeId>, PipelineError> {
    node.parent_indices()
        .iter()
        .map(|&p| {
            mapping.get_index(p).ok_or_else(|| PipelineError::UnresolvedParent {
                expr: node.expr.clone(),
                parent: forest.node(p).map(|n| n.expr.clone()).unwrap_or_else(|| format!("#{}", p.index())),
            })
        })
        .collect()
}

/// Emits the primitive chain of one symbolic node and returns its terminal node.
fn lower(graph: &mut PrimitiveGraph, node: &SymbolicNode, inputs: &[NodeId]) -> Result<NodeId, PipelineError> {
    let expr = node.expr.as_str();

    if node.is_root {
        let input = graph.add_input(expr);
        let scale = graph.add_node(Op::Linear, &[input], format!("{}.scale", expr))?;
        graph.set_params(scale, vec![node.root_scale(), 0.0])?;
        graph.set_params_constant(scale, true)?;
        return Ok(scale);
    }

    let terminal = match node.op {
        OpTag::Exp => unary(graph, inputs, expr, Op::Exp)?,
        OpTag::Log => unary(graph, inputs, expr, Op::Log)?,
        OpTag::Abs => unary(graph, inputs, expr, Op::Mod)?,
        OpTag::Sqrt => abs_pow(graph, inputs, expr, 0.5)?,
        OpTag::Square => abs_pow(graph, inputs, expr, 2.0)?,
        OpTag::Reciprocal => {
            let lin = affine(graph, inputs[0], expr)?;
            let pow = graph.add_node(Op::Pow, &[lin], format!("{}.pow", expr))?;
            // Negative bases leave no domain for an exponent gradient.
            graph.set_params(pow, vec![-1.0])?;
            graph.set_params_constant(pow, true)?;
            pow
        }
        OpTag::Add | OpTag::Subtract => {
            let sign = if node.op == OpTag::Add { 1.0 } else { -1.0 };
            let lin = graph.add_node(Op::Linear, inputs, format!("{}.lin", expr))?;
            graph.set_params(lin, vec![1.0, sign, 0.0])?;
            lin
        }
        OpTag::Divide | OpTag::Multiply => {
            let op = if node.op == OpTag::Divide { Op::Div } else { Op::Mult };
            let lhs = affine(graph, inputs[0], &format!("{}.lhs", expr))?;
            let rhs = affine(graph, inputs[1], &format!("{}.rhs", expr))?;
            graph.add_node(op, &[lhs, rhs], format!("{}.{}", expr, op.name()))?
        }
        OpTag::Identity => {
            return Err(PipelineError::UnknownOperator {
                expr: expr.to_string(),
                op: node.op.symbol().to_string(),
            })
        }
    };
    Ok(terminal)
}

/// Trainable identity-initialized affine node over `parent`.
fn affine(graph: &mut PrimitiveGraph, parent: NodeId, label: &str) -> Result<NodeId, PipelineError> {
    let lin = graph.add_node(Op::Linear, &[parent], format!("{}.lin", label))?;
    graph.set_params(lin, vec![1.0, 0.0])?;
    Ok(lin)
}

fn unary(graph: &mut PrimitiveGraph, inputs: &[NodeId], expr: &str, op: Op) -> Result<NodeId, PipelineError> {
    let lin = affine(graph, inputs[0], expr)?;
    Ok(graph.add_node(op, &[lin], format!("{}.{}", expr, op.name()))?)
}

/// `|lin(x)|^exponent` with a trainable exponent.
fn abs_pow(graph: &mut PrimitiveGraph, inputs: &[NodeId], expr: &str, exponent: f64) -> Result<NodeId, PipelineError> {
    let abs = unary(graph, inputs, expr, Op::Mod)?;
    let pow = graph.add_node(Op::Pow, &[abs], format!("{}.pow", expr))?;
    graph.set_params(pow, vec![exponent])?;
    Ok(pow)
}
