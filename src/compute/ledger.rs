use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Unknown node id {0}")]
    UnknownNode(u32),
    #[error("Operation '{op}' at node '{node_name}' expects {expected} parents, got {actual}")]
    ArityMismatch { node_name: String, op: &'static str, expected: usize, actual: usize },
    #[error("Node '{node_name}' expects {expected} parameters, got {actual}")]
    ParamCount { node_name: String, expected: usize, actual: usize },
    #[error("Active node '{node_name}' depends on inactive node '{parent_name}'")]
    InactiveParent { node_name: String, parent_name: String },
    #[error("Structural mismatch: {msg}")]
    Mismatch { msg: String },
    #[error("Graph has no objective node")]
    NoObjective,
    #[error("Unknown optimizer method '{0}'")]
    UnknownOptimizer(String),
    #[error("Cycle detected: {0}")]
    CycleDetected(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Dense value storage: one column of `n_rows` values per program slot.
///
/// **Layout:** slot `i` occupies `data[i * n_rows..(i + 1) * n_rows]`. Slots follow
/// the program's topological order, so every parent slot precedes its consumer.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    data: Vec<f64>,
    n_rows: usize,
    n_slots: usize,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    /// Reshapes and zeroes the ledger.
    pub fn resize(&mut self, n_slots: usize, n_rows: usize) {
        self.n_slots = n_slots;
        self.n_rows = n_rows;
        self.data.clear();
        self.data.resize(n_slots * n_rows, 0.0);
    }

    #[inline(always)]
    pub fn n_rows(&self) -> usize { self.n_rows }

    #[inline(always)]
    pub fn n_slots(&self) -> usize { self.n_slots }

    #[inline(always)]
    pub fn slot(&self, slot: usize) -> &[f64] {
        &self.data[slot * self.n_rows..(slot + 1) * self.n_rows]
    }

    #[inline(always)]
    pub fn slot_mut(&mut self, slot: usize) -> &mut [f64] {
        let n = self.n_rows;
        &mut self.data[slot * n..(slot + 1) * n]
    }

    /// Splits the storage at `slot`: everything before it (read/accumulate) and the
    /// slot itself onwards.
    #[inline(always)]
    pub fn split_at_slot_mut(&mut self, slot: usize) -> (&mut [f64], &mut [f64]) {
        self.data.split_at_mut(slot * self.n_rows)
    }
}
