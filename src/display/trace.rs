use crate::compute::PrimitiveGraph;
use crate::store::{NodeId, Op};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the dependency chain of `target` with its parameters and the
/// values of the last evaluation.
pub fn format_trace(graph: &PrimitiveGraph, target: NodeId) -> String {
    let mut tracer = Tracer {
        graph,
        visited_at_level: HashMap::new(),
        output: String::new(),
    };

    match graph.name(target) {
        Ok(name) => {
            let _ = writeln!(tracer.output, "AUDIT TRACE for node '{}':", name);
            let _ = writeln!(tracer.output, "--------------------------------------------------");
            tracer.trace_node(target, 1, "");
        }
        Err(_) => {
            let _ = writeln!(tracer.output, "Error: Invalid Node ID {:?}", target);
        }
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a PrimitiveGraph,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let name = self.graph.name(node_id).unwrap_or("?");
        let op = self.graph.op(node_id).map(|o| o.name()).unwrap_or("?");
        let line_header = format!("[L{}] {}{}", level, name, self.format_value(node_id));
        let params = self.format_params(node_id);

        match self.graph.op(node_id) {
            Ok(Op::Input { column }) => {
                let _ = writeln!(self.output, "{}{} -> X[:, {}]", prefix, line_header, column);
            }
            _ => {
                let parents = self.graph.parents(node_id).unwrap_or(&[]);
                let args: Vec<&str> = parents.iter().map(|p| self.graph.name(*p).unwrap_or("?")).collect();
                let _ = writeln!(self.output, "{}{} = {}({}){}", prefix, line_header, op, args.join(", "), params);
                self.recurse_children(prefix, parents, level);
            }
        }
    }

    fn recurse_children(&mut self, prefix: &str, children: &[NodeId], level: usize) {
        let stem = self.build_child_stem(prefix);
        for (i, &child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_node(child, level + 1, &full_prefix);
        }
    }

    fn format_params(&self, id: NodeId) -> String {
        let params = self.graph.params(id).unwrap_or(&[]);
        if params.is_empty() {
            return String::new();
        }
        let body: Vec<String> = params.iter().map(|p| format!("{:.4}", p)).collect();
        let marker = if self.graph.is_params_constant(id) { " const" } else { "" };
        format!(" {{{}}}{}", body.join(", "), marker)
    }

    fn format_value(&self, id: NodeId) -> String {
        if !self.graph.is_active(id) {
            return "[bypassed]".to_string();
        }
        match self.graph.vals(id) {
            Some([]) => "[empty]".to_string(),
            Some([v]) => format!("[{:.3}]", v),
            Some(vals) => format!("[{:.3}, ...]", vals[0]),
            None => "[?]".to_string(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}
