use crate::analysis::topology;
use crate::store::{Registry, NodeId};
use super::ledger::ComputationError;

pub const UNMAPPED: u32 = u32::MAX;

/// Linear execution tape over the active part of the graph.
///
/// Instruction `i` evaluates `order[i]` and writes ledger slot `i`.
/// Inactive nodes have no slot: they are bypassed by both passes.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub order: Vec<NodeId>,
    /// Map: NodeId -> ledger slot (`UNMAPPED` for bypassed nodes).
    pub layout: Vec<u32>,
    /// Parent slots, flattened per instruction.
    pub parent_slots: Vec<u32>,
    pub parent_ranges: Vec<(u32, u32)>,
}

impl Program {
    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn slot_of(&self, id: NodeId) -> Option<usize> {
        match self.layout.get(id.index()) {
            Some(&slot) if slot != UNMAPPED => Some(slot as usize),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn parents_of(&self, instr: usize) -> &[u32] {
        let (start, count) = self.parent_ranges[instr];
        &self.parent_slots[start as usize..(start + count) as usize]
    }
}

pub struct Compiler<'a> {
    registry: &'a Registry,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Compiles the active nodes into a topologically ordered program.
    ///
    /// Fails when an active node reads from an inactive one: deactivation must be
    /// applied to whole branches, otherwise the bypassed value would be missing.
    pub fn compile(&self) -> Result<Program, ComputationError> {
        let order: Vec<NodeId> = topology::sort(self.registry)
            .map_err(ComputationError::CycleDetected)?
            .into_iter()
            .filter(|id| self.registry.active[id.index()])
            .collect();

        let mut layout = vec![UNMAPPED; self.registry.count()];
        for (slot, id) in order.iter().enumerate() {
            layout[id.index()] = slot as u32;
        }

        let mut parent_slots = Vec::new();
        let mut parent_ranges = Vec::with_capacity(order.len());
        for &id in &order {
            let start = parent_slots.len() as u32;
            for &parent in self.registry.get_parents(id) {
                let slot = layout[parent.index()];
                if slot == UNMAPPED {
                    return Err(ComputationError::InactiveParent {
                        node_name: self.registry.meta[id.index()].name.clone(),
                        parent_name: self.registry.meta[parent.index()].name.clone(),
                    });
                }
                parent_slots.push(slot);
            }
            parent_ranges.push((start, parent_slots.len() as u32 - start));
        }

        Ok(Program { order, layout, parent_slots, parent_ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NodeMetadata, Op};

    fn chain() -> (Registry, NodeId, NodeId, NodeId) {
        let mut reg = Registry::new();
        let x = reg.add_node(Op::Input { column: 0 }, &[], NodeMetadata::named("x"));
        let l = reg.add_node(Op::Linear, &[x], NodeMetadata::named("l"));
        let e = reg.add_node(Op::Exp, &[l], NodeMetadata::named("e"));
        (reg, x, l, e)
    }

    #[test]
    fn test_compile_assigns_slots_in_order() {
        let (reg, x, l, e) = chain();
        let program = Compiler::new(&reg).compile().unwrap();

        assert_eq!(program.order, vec![x, l, e]);
        assert_eq!(program.slot_of(e), Some(2));
        assert_eq!(program.parents_of(2), &[1]);
        assert!(program.parents_of(0).is_empty());
    }

    #[test]
    fn test_inactive_nodes_are_bypassed() {
        let (mut reg, _x, _l, e) = chain();
        reg.active[e.index()] = false;
        let program = Compiler::new(&reg).compile().unwrap();

        assert_eq!(program.len(), 2);
        assert_eq!(program.slot_of(e), None);
    }

    #[test]
    fn test_inactive_parent_is_rejected() {
        let (mut reg, _x, l, _e) = chain();
        reg.active[l.index()] = false;
        let err = Compiler::new(&reg).compile().unwrap_err();
        assert!(matches!(err, ComputationError::InactiveParent { .. }));
    }
}
