//! Symbolic feature nodes and their operator vocabulary.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use super::forest::{ForestError, ForestIndex};

/// Closed set of operators a symbolic node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpTag {
    /// Identity; only roots carry it.
    Identity,
    Exp,
    Log,
    Abs,
    Sqrt,
    Reciprocal,
    Square,
    Add,
    Subtract,
    Divide,
    Multiply,
}

impl OpTag {
    pub const ALL: [OpTag; 11] = [
        OpTag::Identity, OpTag::Exp, OpTag::Log, OpTag::Abs, OpTag::Sqrt, OpTag::Reciprocal,
        OpTag::Square, OpTag::Add, OpTag::Subtract, OpTag::Divide, OpTag::Multiply,
    ];

    /// Single-character tag used by the feature generator.
    pub fn symbol(&self) -> &'static str {
        match self {
            OpTag::Identity => "I",
            OpTag::Exp => "e",
            OpTag::Log => "l",
            OpTag::Abs => "|",
            OpTag::Sqrt => "s",
            OpTag::Reciprocal => "r",
            OpTag::Square => "2",
            OpTag::Add => "+",
            OpTag::Subtract => "-",
            OpTag::Divide => ":",
            OpTag::Multiply => "*",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            OpTag::Identity => 0,
            OpTag::Exp | OpTag::Log | OpTag::Abs | OpTag::Sqrt | OpTag::Reciprocal | OpTag::Square => 1,
            OpTag::Add | OpTag::Subtract | OpTag::Divide | OpTag::Multiply => 2,
        }
    }

    /// Applies the operator to scalar arguments.
    #[inline]
    pub fn apply(&self, args: &[f64]) -> f64 {
        match self {
            OpTag::Identity => args[0],
            OpTag::Exp => args[0].exp(),
            OpTag::Log => args[0].ln(),
            OpTag::Abs => args[0].abs(),
            OpTag::Sqrt => args[0].sqrt(),
            OpTag::Reciprocal => 1.0 / args[0],
            OpTag::Square => args[0] * args[0],
            OpTag::Add => args[0] + args[1],
            OpTag::Subtract => args[0] - args[1],
            OpTag::Divide => args[0] / args[1],
            OpTag::Multiply => args[0] * args[1],
        }
    }
}

impl FromStr for OpTag {
    type Err = ForestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpTag::ALL
            .iter()
            .find(|op| op.symbol() == s)
            .copied()
            .ok_or_else(|| ForestError::UnknownOperator(s.to_string()))
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One node of the symbolic forest.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicNode {
    /// Canonical expression string, unique within a forest.
    pub expr: String,
    pub op: OpTag,
    pub(crate) parents: SmallVec<[ForestIndex; 2]>,
    pub is_root: bool,
    pub prefactor: f64,
    pub unit_prefactor: f64,
    /// Feature quality; higher is better.
    pub q: f64,
    /// Signed correlation with the training target.
    pub cov: f64,
}

impl SymbolicNode {
    pub fn parent_indices(&self) -> &[ForestIndex] {
        &self.parents
    }

    /// Scale applied to a root's raw input column.
    pub fn root_scale(&self) -> f64 {
        self.prefactor * self.unit_prefactor
    }

    /// `|cov * q|`
    pub fn activity_probability(&self) -> f64 {
        (self.cov * self.q).abs()
    }
}
