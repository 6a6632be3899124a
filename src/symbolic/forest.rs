//! The ordered symbolic forest produced by feature generation, with its own
//! reference evaluator.
//!
//! Nodes are stored in a petgraph `DiGraph` with edges running parent -> child.
//! Insertion order is the forest order: every node's parents have a lower index.

use super::node::{OpTag, SymbolicNode};
use ndarray::ArrayView2;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Stable handle of a node inside a [`Forest`].
pub type ForestIndex = NodeIndex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForestError {
    #[error("Unknown operator tag '{0}'")]
    UnknownOperator(String),

    #[error("Node '{expr}' references parent '{parent}' which is not yet in the forest")]
    UnknownParent { expr: String, parent: String },

    #[error("Node '{0}' already exists in the forest")]
    DuplicateExpr(String),

    #[error("Node '{expr}' ({op}) expects {expected} parents, got {actual}")]
    Arity { expr: String, op: OpTag, expected: usize, actual: usize },

    #[error("Root '{expr}' must use the identity operator, got '{op}'")]
    InvalidRoot { expr: String, op: OpTag },

    #[error("Input has {actual} columns but the forest has {expected} roots")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("Unknown forest index {0}")]
    UnknownIndex(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Flat, serializable description of one symbolic node. Parents are referenced by `expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestRecord {
    pub expr: String,
    pub op: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default = "one")]
    pub prefactor: f64,
    #[serde(default = "one")]
    pub unit_prefactor: f64,
    #[serde(default)]
    pub q: f64,
    #[serde(default)]
    pub cov: f64,
}

fn one() -> f64 { 1.0 }

#[derive(Debug, Clone, Default)]
pub struct Forest {
    graph: DiGraph<SymbolicNode, ()>,
    by_expr: HashMap<String, ForestIndex>,
    roots: Vec<ForestIndex>,
}

impl Forest {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.graph.node_count() }
    pub fn is_empty(&self) -> bool { self.graph.node_count() == 0 }
    pub fn root_count(&self) -> usize { self.roots.len() }

    /// Appends a root reading the next input column.
    pub fn add_root(
        &mut self,
        expr: impl Into<String>,
        prefactor: f64,
        unit_prefactor: f64,
    ) -> Result<ForestIndex, ForestError> {
        let expr = expr.into();
        self.check_unique(&expr)?;
        let idx = self.graph.add_node(SymbolicNode {
            expr: expr.clone(),
            op: OpTag::Identity,
            parents: SmallVec::new(),
            is_root: true,
            prefactor,
            unit_prefactor,
            q: 0.0,
            cov: 0.0,
        });
        self.by_expr.insert(expr, idx);
        self.roots.push(idx);
        Ok(idx)
    }

    /// Appends an operator node over already-present parents.
    pub fn add_node(
        &mut self,
        expr: impl Into<String>,
        op: OpTag,
        parents: &[ForestIndex],
    ) -> Result<ForestIndex, ForestError> {
        let expr = expr.into();
        self.check_unique(&expr)?;
        if op == OpTag::Identity {
            return Err(ForestError::Arity { expr, op, expected: 1, actual: parents.len() });
        }
        if parents.len() != op.arity() {
            return Err(ForestError::Arity { expr, op, expected: op.arity(), actual: parents.len() });
        }
        for p in parents {
            if p.index() >= self.graph.node_count() {
                return Err(ForestError::UnknownParent { expr, parent: format!("#{}", p.index()) });
            }
        }

        let idx = self.graph.add_node(SymbolicNode {
            expr: expr.clone(),
            op,
            parents: parents.iter().copied().collect(),
            is_root: false,
            prefactor: 1.0,
            unit_prefactor: 1.0,
            q: 0.0,
            cov: 0.0,
        });
        for &p in parents {
            self.graph.add_edge(p, idx, ());
        }
        self.by_expr.insert(expr, idx);
        Ok(idx)
    }

    fn check_unique(&self, expr: &str) -> Result<(), ForestError> {
        if self.by_expr.contains_key(expr) {
            return Err(ForestError::DuplicateExpr(expr.to_string()));
        }
        Ok(())
    }

    pub fn set_scores(&mut self, idx: ForestIndex, q: f64, cov: f64) -> Result<(), ForestError> {
        let node = self.graph.node_weight_mut(idx).ok_or(ForestError::UnknownIndex(idx.index()))?;
        node.q = q;
        node.cov = cov;
        Ok(())
    }

    pub fn node(&self, idx: ForestIndex) -> Option<&SymbolicNode> {
        self.graph.node_weight(idx)
    }

    pub fn index_of(&self, expr: &str) -> Option<ForestIndex> {
        self.by_expr.get(expr).copied()
    }

    /// Nodes in forest order (parents before children).
    pub fn iter(&self) -> impl Iterator<Item = (ForestIndex, &SymbolicNode)> + '_ {
        self.graph.node_indices().map(move |i| (i, &self.graph[i]))
    }

    pub fn parents(&self, idx: ForestIndex) -> &[ForestIndex] {
        self.graph.node_weight(idx).map(|n| n.parent_indices()).unwrap_or(&[])
    }

    /// Input column read by a root, `None` for non-roots.
    pub fn root_column(&self, idx: ForestIndex) -> Option<usize> {
        self.roots.iter().position(|&r| r == idx)
    }

    // --- Evaluation ---

    /// Evaluates every node over the rows of `x`; the result is indexed like the forest.
    pub fn evaluate(&self, x: ArrayView2<f64>) -> Result<Vec<Vec<f64>>, ForestError> {
        self.check_columns(x)?;
        let mut values: Vec<Vec<f64>> = Vec::with_capacity(self.len());
        for (idx, node) in self.iter() {
            let v = self.eval_node(idx, node, x, |p| &values[p.index()]);
            values.push(v);
        }
        Ok(values)
    }

    /// Evaluates one node, touching only its ancestor closure.
    pub fn evaluate_single_node(&self, idx: ForestIndex, x: ArrayView2<f64>) -> Result<Vec<f64>, ForestError> {
        if idx.index() >= self.len() {
            return Err(ForestError::UnknownIndex(idx.index()));
        }
        self.check_columns(x)?;

        let mut closure = Vec::new();
        let mut dfs = Dfs::new(Reversed(&self.graph), idx);
        while let Some(n) = dfs.next(Reversed(&self.graph)) {
            closure.push(n);
        }
        // Index order is topological order.
        closure.sort_unstable();

        let mut values: HashMap<ForestIndex, Vec<f64>> = HashMap::with_capacity(closure.len());
        for n in closure {
            let v = self.eval_node(n, &self.graph[n], x, |p| &values[&p]);
            values.insert(n, v);
        }
        values.remove(&idx).ok_or(ForestError::UnknownIndex(idx.index()))
    }

    fn eval_node<'v>(
        &self,
        idx: ForestIndex,
        node: &SymbolicNode,
        x: ArrayView2<f64>,
        lookup: impl Fn(ForestIndex) -> &'v Vec<f64>,
    ) -> Vec<f64> {
        if node.is_root {
            let column = self.root_column(idx).unwrap_or(0);
            let scale = node.root_scale();
            return x.column(column).iter().map(|&v| scale * v).collect();
        }
        match node.parents.as_slice() {
            [a] => lookup(*a).iter().map(|&v| node.op.apply(&[v])).collect(),
            [a, b] => lookup(*a)
                .iter()
                .zip(lookup(*b))
                .map(|(&u, &v)| node.op.apply(&[u, v]))
                .collect(),
            _ => vec![f64::NAN; x.nrows()],
        }
    }

    fn check_columns(&self, x: ArrayView2<f64>) -> Result<(), ForestError> {
        if x.ncols() < self.roots.len() {
            return Err(ForestError::ColumnMismatch { expected: self.roots.len(), actual: x.ncols() });
        }
        Ok(())
    }

    // --- Loading ---

    /// Builds a forest from records listed in forest order.
    pub fn from_records(records: &[ForestRecord]) -> Result<Self, ForestError> {
        let mut forest = Forest::new();
        for rec in records {
            let op: OpTag = rec.op.parse()?;
            let idx = if rec.is_root {
                if op != OpTag::Identity {
                    return Err(ForestError::InvalidRoot { expr: rec.expr.clone(), op });
                }
                forest.add_root(rec.expr.clone(), rec.prefactor, rec.unit_prefactor)?
            } else {
                let parents = rec
                    .parents
                    .iter()
                    .map(|p| {
                        forest.index_of(p).ok_or_else(|| ForestError::UnknownParent {
                            expr: rec.expr.clone(),
                            parent: p.clone(),
                        })
                    })
                    .collect::<Result<SmallVec<[ForestIndex; 2]>, _>>()?;
                forest.add_node(rec.expr.clone(), op, &parents)?
            };
            forest.set_scores(idx, rec.q, rec.cov)?;
        }
        Ok(forest)
    }

    pub fn to_records(&self) -> Vec<ForestRecord> {
        self.iter()
            .map(|(_, n)| ForestRecord {
                expr: n.expr.clone(),
                op: n.op.symbol().to_string(),
                parents: n.parents.iter().map(|p| self.graph[*p].expr.clone()).collect(),
                is_root: n.is_root,
                prefactor: n.prefactor,
                unit_prefactor: n.unit_prefactor,
                q: n.q,
                cov: n.cov,
            })
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self, ForestError> {
        let records: Vec<ForestRecord> =
            serde_json::from_str(json).map_err(|e| ForestError::Serialization(e.to_string()))?;
        Self::from_records(&records)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let json = std::fs::read_to_string(path).map_err(|e| ForestError::Serialization(e.to_string()))?;
        Self::from_json(&json)
    }
}
