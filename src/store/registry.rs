use super::types::*;
use serde::{Serialize, Deserialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    // Columnar Arrays
    pub ops: Vec<Op>,
    pub meta: Vec<NodeMetadata>,

    // Topology (CSR-ish)
    pub parents_flat: Vec<NodeId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Node state
    pub params: Vec<Vec<f64>>,
    pub active: Vec<bool>,
    pub params_constant: Vec<bool>,
    pub dropped: Vec<bool>,

    // Ephemeral state for uniqueness checks (Not serialized, rebuilt on load)
    #[serde(skip)]
    pub used_names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.ops.len() }

    /// Rebuilds the `used_names` set after deserialization.
    pub fn rebuild_name_cache(&mut self) {
        self.used_names = self.meta.iter().map(|m| m.name.clone()).collect();
    }

    pub fn add_node(&mut self, op: Op, parents: &[NodeId], mut meta: NodeMetadata) -> NodeId {
        let id = NodeId(self.ops.len() as u32);

        // --- Unique Name Enforcement ---
        let original_name = meta.name.clone();
        let mut candidate_name = original_name.clone();
        let mut counter = 1;

        while self.used_names.contains(&candidate_name) {
            candidate_name = format!("{}_{}", original_name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate_name.clone());
        meta.name = candidate_name;
        // -------------------------------

        // 1. Register Parents
        let start = self.parents_flat.len() as u32;
        let count = parents.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges.push((start, count));

        // 2. State
        self.params.push(op.default_params(parents.len()));
        self.active.push(true);
        self.params_constant.push(false);
        self.dropped.push(false);

        // 3. Metadata
        self.ops.push(op);
        self.meta.push(meta);

        id
    }

    #[inline(always)]
    pub fn get_parents(&self, id: NodeId) -> &[NodeId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_made_unique() {
        let mut reg = Registry::new();
        let a = reg.add_node(Op::Input { column: 0 }, &[], NodeMetadata::named("x"));
        let b = reg.add_node(Op::Linear, &[a], NodeMetadata::named("x"));
        let c = reg.add_node(Op::Linear, &[a], NodeMetadata::named("x"));

        assert_eq!(reg.meta[a.index()].name, "x");
        assert_eq!(reg.meta[b.index()].name, "x_1");
        assert_eq!(reg.meta[c.index()].name, "x_2");
    }

    #[test]
    fn test_parent_ranges_are_contiguous() {
        let mut reg = Registry::new();
        let a = reg.add_node(Op::Input { column: 0 }, &[], NodeMetadata::named("a"));
        let b = reg.add_node(Op::Input { column: 1 }, &[], NodeMetadata::named("b"));
        let c = reg.add_node(Op::Mult, &[a, b], NodeMetadata::named("c"));
        let d = reg.add_node(Op::Exp, &[a], NodeMetadata::named("d"));

        assert!(reg.get_parents(a).is_empty());
        assert_eq!(reg.get_parents(c), &[a, b]);
        assert_eq!(reg.get_parents(d), &[a]);
        assert_eq!(reg.parents_flat.len(), 3);
    }

    #[test]
    fn test_new_nodes_default_state() {
        let mut reg = Registry::new();
        let a = reg.add_node(Op::Input { column: 0 }, &[], NodeMetadata::named("a"));
        let l = reg.add_node(Op::Linear, &[a, a], NodeMetadata::named("l"));
        let p = reg.add_node(Op::Pow, &[l], NodeMetadata::named("p"));

        assert_eq!(reg.params[l.index()], vec![1.0, 1.0, 0.0]);
        assert_eq!(reg.params[p.index()], vec![1.0]);
        assert!(reg.active[p.index()]);
        assert!(!reg.params_constant[p.index()]);
        assert!(!reg.dropped[p.index()]);
    }
}
