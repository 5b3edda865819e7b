// Compiler - Turns a graph into an executable program
//
// Compilation resolves each built-in node's behavior once and lets it run its
// `register` hook: event nodes mark their signal output as a root and subscribe
// it to an event name; loop nodes allocate variable slots for the values they
// expose to their bodies. Roots are opaque handles; marking the same output
// twice yields the same handle.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::graph::Graph;
use crate::node::{NodeId, NodeKind, OutputRef};
use crate::registry::{NodeBehavior, NodeRegistry};

/// Opaque handle for a signal output reachable from an external trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryPoint(u32);

/// Slot in an execution context's variable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Program
// ─────────────────────────────────────────────────────────────────────────────

/// The compiled form of a graph
#[derive(Default)]
pub struct Program {
    /// Indexed by node id
    behaviors: Vec<Option<Arc<dyn NodeBehavior>>>,
    roots: Vec<OutputRef>,
    index: HashMap<OutputRef, EntryPoint>,
    events: BTreeMap<String, Vec<EntryPoint>>,
    slots: HashMap<NodeId, Vec<VarId>>,
    next_var: u32,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("roots", &self.roots)
            .field("events", &self.events)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl Program {
    pub fn behavior(&self, node: NodeId) -> Option<&Arc<dyn NodeBehavior>> {
        self.behaviors.get(node.0).and_then(|b| b.as_ref())
    }

    /// The signal output an entry point starts from
    pub fn root(&self, entry: EntryPoint) -> Option<OutputRef> {
        self.roots.get(entry.0 as usize).copied()
    }

    /// Entry points subscribed to an event name
    pub fn entry_points(&self, event: &str) -> &[EntryPoint] {
        self.events.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Event names with at least one subscriber, sorted
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// The `index`-th variable slot allocated by a node
    pub fn slot(&self, node: NodeId, index: usize) -> Option<VarId> {
        self.slots.get(&node).and_then(|s| s.get(index)).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.roots.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

pub struct Compiler {
    program: Program,
}

impl Compiler {
    /// Compile every built-in node of a graph
    pub fn compile(graph: &Graph, registry: &NodeRegistry) -> Program {
        let mut compiler = Compiler {
            program: Program::default(),
        };

        for (id, node) in graph.nodes() {
            let NodeKind::Builtin(type_id) = node.kind() else {
                continue;
            };
            let Some(behavior) = registry.get_behavior(type_id) else {
                warn!(node = %id, node_type = %type_id, "No behavior registered, node is inert");
                continue;
            };
            behavior.register(id, node.config(), &mut compiler);

            let behaviors = &mut compiler.program.behaviors;
            if behaviors.len() <= id.0 {
                behaviors.resize(id.0 + 1, None);
            }
            behaviors[id.0] = Some(behavior);
        }

        let program = compiler.program;
        info!(
            nodes = graph.node_count(),
            entry_points = program.entry_count(),
            events = program.events.len(),
            "Compiled graph"
        );
        program
    }

    /// Mark a signal output as an entry point
    pub fn mark_root(&mut self, output: OutputRef) -> EntryPoint {
        if let Some(entry) = self.program.index.get(&output) {
            return *entry;
        }
        let entry = EntryPoint(self.program.roots.len() as u32);
        self.program.roots.push(output);
        self.program.index.insert(output, entry);
        entry
    }

    /// Run `entry` whenever `event` fires
    pub fn subscribe(&mut self, event: &str, entry: EntryPoint) {
        let subscribers = self.program.events.entry(event.to_string()).or_default();
        if !subscribers.contains(&entry) {
            subscribers.push(entry);
        }
    }

    /// Allocate a fresh variable slot owned by `node`
    pub fn allocate_id(&mut self, node: NodeId) -> VarId {
        let id = VarId(self.program.next_var);
        self.program.next_var += 1;
        self.program.slots.entry(node).or_default().push(id);
        id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::node::Position;

    #[test]
    fn test_mark_root_is_idempotent() {
        let mut compiler = Compiler {
            program: Program::default(),
        };
        let output = OutputRef::new(NodeId(3), 0);
        let a = compiler.mark_root(output);
        let b = compiler.mark_root(output);
        assert_eq!(a, b);
        assert_eq!(compiler.program.entry_count(), 1);
    }

    #[test]
    fn test_allocate_id_is_unique() {
        let mut compiler = Compiler {
            program: Program::default(),
        };
        let a = compiler.allocate_id(NodeId(0));
        let b = compiler.allocate_id(NodeId(0));
        let c = compiler.allocate_id(NodeId(1));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(compiler.program.slot(NodeId(0), 1), Some(b));
    }

    #[test]
    fn test_event_nodes_subscribe() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let join = graph
            .add_builtin(&registry, "event/On", json!({ "event": "join" }), Position::default())
            .unwrap();
        graph
            .add_builtin(&registry, "event/On", json!({ "event": "chat" }), Position::default())
            .unwrap();
        graph
            .add_builtin(&registry, "event/On", json!({ "event": "join" }), Position::default())
            .unwrap();

        let program = Compiler::compile(&graph, &registry);
        assert_eq!(program.entry_count(), 3);
        assert_eq!(program.entry_points("join").len(), 2);
        assert_eq!(program.events().collect::<Vec<_>>(), vec!["chat", "join"]);

        let first = program.entry_points("join")[0];
        assert_eq!(program.root(first), Some(OutputRef::new(join, 0)));
        assert!(program.entry_points("quit").is_empty());
    }
}
