use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Diagnostic label, unique within a registry.
    pub name: String,
}

impl NodeMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Primitive operations understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// Reads one column of the feature matrix.
    Input { column: u32 },
    /// `sum(w_i * x_i) + b`, params `[w_1..w_n, b]`.
    Linear,
    Exp,
    Log,
    /// Absolute value.
    Mod,
    /// `x^p`, params `[p]`.
    Pow,
    Div,
    Mult,
    /// Linear combination flagged as a model output.
    Output,
    /// Placeholder for the training target.
    Target,
    /// Mean squared error between `[output, target]`.
    Objective,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Input { .. } => "input",
            Op::Linear => "linear",
            Op::Exp => "exp",
            Op::Log => "log",
            Op::Mod => "mod",
            Op::Pow => "pow",
            Op::Div => "div",
            Op::Mult => "mult",
            Op::Output => "output",
            Op::Target => "target",
            Op::Objective => "objective",
        }
    }

    /// Required number of parents, `None` for variadic ops (at least one parent).
    pub fn arity(&self) -> Option<usize> {
        match self {
            Op::Input { .. } | Op::Target => Some(0),
            Op::Exp | Op::Log | Op::Mod | Op::Pow => Some(1),
            Op::Div | Op::Mult | Op::Objective => Some(2),
            Op::Linear | Op::Output => None,
        }
    }

    pub fn param_count(&self, n_parents: usize) -> usize {
        match self {
            Op::Linear | Op::Output => n_parents + 1,
            Op::Pow => 1,
            _ => 0,
        }
    }

    /// Parameters a freshly created node starts with.
    pub fn default_params(&self, n_parents: usize) -> Vec<f64> {
        match self {
            Op::Linear | Op::Output => {
                let mut p = vec![1.0; n_parents];
                p.push(0.0);
                p
            }
            Op::Pow => vec![1.0],
            _ => Vec::new(),
        }
    }
}
