//! Numerical agreement check between the symbolic forest and its compiled graph.

use super::error::PipelineError;
use super::translate::NodeMapping;
use crate::compute::{ComputationError, PrimitiveGraph};
use crate::display::format_trace;
use crate::symbolic::Forest;
use ndarray::ArrayView2;

/// Maximum normalized discrepancy accepted per node.
pub const TRANSLATION_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// `(expr, discrepancy)` for every compared node, in forest order.
    pub discrepancies: Vec<(String, f64)>,
    /// Nodes skipped because their compiled node is inactive.
    pub skipped: usize,
}

impl ValidationReport {
    pub fn checked(&self) -> usize { self.discrepancies.len() }

    pub fn max_discrepancy(&self) -> f64 {
        self.discrepancies.iter().map(|(_, d)| *d).fold(0.0, f64::max)
    }
}

/// `max|symbolic - compiled| / (max(symbolic) - min(symbolic))`.
///
/// Positions where both sides are NaN, or the same infinity, agree. Any other
/// non-finite difference yields `+inf`. A degenerate range falls back to the
/// unnormalized maximum difference.
pub fn normalized_discrepancy(symbolic: &[f64], compiled: &[f64]) -> f64 {
    if symbolic.len() != compiled.len() {
        return f64::INFINITY;
    }

    let mut max_diff: f64 = 0.0;
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (&s, &c) in symbolic.iter().zip(compiled) {
        if s.is_finite() {
            lo = lo.min(s);
            hi = hi.max(s);
        }
        if (s.is_nan() && c.is_nan()) || (s.is_infinite() && s == c) {
            continue;
        }
        let diff = (s - c).abs();
        if !diff.is_finite() {
            return f64::INFINITY;
        }
        max_diff = max_diff.max(diff);
    }

    if max_diff == 0.0 {
        return 0.0;
    }
    let range = hi - lo;
    if range > f64::EPSILON * hi.abs().max(1.0) {
        max_diff / range
    } else {
        max_diff
    }
}

/// Checks every active compiled node against the forest's own evaluator
/// using [`TRANSLATION_TOLERANCE`].
pub fn check_translation(
    forest: &Forest,
    graph: &mut PrimitiveGraph,
    mapping: &NodeMapping,
    x: ArrayView2<f64>,
) -> Result<ValidationReport, PipelineError> {
    check_translation_with_tolerance(forest, graph, mapping, x, TRANSLATION_TOLERANCE)
}

pub fn check_translation_with_tolerance(
    forest: &Forest,
    graph: &mut PrimitiveGraph,
    mapping: &NodeMapping,
    x: ArrayView2<f64>,
    tolerance: f64,
) -> Result<ValidationReport, PipelineError> {
    log::info!("Checking compiled graph against {} symbolic nodes", forest.len());
    graph.evaluate(x)?;

    let mut report = ValidationReport::default();
    for (idx, fnode) in forest.iter() {
        let cnode = mapping.get_index(idx).ok_or_else(|| PipelineError::Unmapped(fnode.expr.clone()))?;
        if !graph.is_active(cnode) {
            report.skipped += 1;
            continue;
        }

        let symbolic = forest.evaluate_single_node(idx, x)?;
        let compiled = graph.vals(cnode).ok_or_else(|| ComputationError::Mismatch {
            msg: format!("No values for active node '{}'", fnode.expr),
        })?;
        let discrepancy = normalized_discrepancy(&symbolic, compiled);
        log::debug!("{:<40} {:+1.7e}", fnode.expr, discrepancy);

        if discrepancy > tolerance {
            log::error!(
                "Translation mismatch at '{}' ({:e} > {:e})\nsymbolic: {:?}\ncompiled: {:?}\n{}",
                fnode.expr, discrepancy, tolerance, symbolic, compiled, format_trace(graph, cnode)
            );
            return Err(PipelineError::TranslationMismatch { expr: fnode.expr.clone(), discrepancy });
        }
        report.discrepancies.push((fnode.expr.clone(), discrepancy));
    }

    log::info!("- OK ({} checked, {} skipped)", report.checked(), report.skipped);
    Ok(report)
}
