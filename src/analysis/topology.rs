use crate::store::{Registry, NodeId};
use std::collections::HashSet;

/// Performs a Topological Sort using Depth-First Search (DFS).
///
/// Returns a list of NodeIds where every dependency appears before its consumer.
///
/// **Optimization:**
/// Uses DFS instead of BFS (Kahn's) to improve cache locality. In a deep dependency
/// chain A->B->C, DFS places [A, B, C] close together, which is exactly the shape of
/// the affine/primitive chains the translator emits.
pub fn sort(registry: &Registry) -> Result<Vec<NodeId>, String> {
    let count = registry.count();
    let mut order = Vec::with_capacity(count);
    let mut state = vec![VisitState::None; count];

    // Iterate 0..count so that disconnected nodes (e.g. unused inputs) are visited too.
    for i in 0..count {
        if state[i] == VisitState::None {
            visit(NodeId::new(i), registry, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

#[derive(Clone, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

fn visit(
    node: NodeId,
    registry: &Registry,
    state: &mut Vec<VisitState>,
    order: &mut Vec<NodeId>,
) -> Result<(), String> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => return Err(format!("Cycle detected involving node {}", idx)),
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for &parent in registry.get_parents(node) {
        visit(parent, registry, state, order)?;
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    Ok(())
}

/// Collects the start nodes together with every node they transitively depend on.
///
/// This is the closure that branch activation marks: shared upstream nodes are
/// visited once no matter how many branches reach them.
pub fn upstream_from(registry: &Registry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut stack: Vec<NodeId> = start_nodes.to_vec();

    while let Some(node) = stack.pop() {
        if visited.insert(node) {
            stack.extend_from_slice(registry.get_parents(node));
        }
    }
    visited
}
