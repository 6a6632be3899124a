use std::collections::BTreeMap;
use crate::store::Registry;

/// Structural summary of a primitive graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryReport {
    pub total_nodes: usize,
    pub active_nodes: usize,
    /// Node count per op name, active nodes only.
    pub op_counts: BTreeMap<&'static str, usize>,
    /// Parameters the optimizer may update (active, non-constant nodes).
    pub trainable_params: usize,
    /// Parameters frozen via `params_constant`.
    pub constant_params: usize,
}

impl TelemetryReport {
    pub fn analyze(registry: &Registry) -> Self {
        let mut report = Self { total_nodes: registry.count(), ..Default::default() };

        for (i, op) in registry.ops.iter().enumerate() {
            if !registry.active[i] {
                continue;
            }
            report.active_nodes += 1;
            *report.op_counts.entry(op.name()).or_insert(0) += 1;

            let n_params = registry.params[i].len();
            if registry.params_constant[i] {
                report.constant_params += n_params;
            } else {
                report.trainable_params += n_params;
            }
        }
        report
    }
}
