//! Script Host
//!
//! Owns a graph together with its compiled program and serves triggers against
//! it. Any number of triggers may run at once: each takes the read side of the
//! mutation lock for the whole invocation and works in its own
//! [`ExecutionContext`]. Structural edits take the write side, so they wait for
//! running invocations to finish and new invocations wait for the edit, which
//! recompiles the program before releasing the lock.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use wildmatch::WildMatch;

use blueprint_types::StructType;

use crate::compiler::{Compiler, Program};
use crate::definitions::{FunctionDef, FunctionId, StructId};
use crate::error::{EvalError, GraphError, PersistError};
use crate::evaluator::{EvaluatorOptions, Evaluator, ExecutionContext, ExecutionResult, ExecutionTrigger};
use crate::graph::Graph;
use crate::persistence;
use crate::registry::NodeRegistry;
use crate::summary::GraphSummary;

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for one event name, across all of its entry points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub invocations: u64,
    pub failures: u64,
    pub steps: u64,
}

/// What a successful [`ScriptHost::load`] had to leave out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub version: i32,
    pub dropped_nodes: usize,
    pub dropped_wires: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Host
// ─────────────────────────────────────────────────────────────────────────────

struct HostState {
    graph: Graph,
    program: Program,
}

pub struct ScriptHost {
    registry: Arc<NodeRegistry>,
    state: RwLock<HostState>,
    stats: DashMap<String, EventStats>,
    options: EvaluatorOptions,
}

impl ScriptHost {
    /// Create a host with an empty graph
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_graph(registry, Graph::new())
    }

    pub fn with_graph(registry: Arc<NodeRegistry>, graph: Graph) -> Self {
        let program = Compiler::compile(&graph, &registry);
        Self {
            registry,
            state: RwLock::new(HostState { graph, program }),
            stats: DashMap::new(),
            options: EvaluatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EvaluatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Run every entry point subscribed to the trigger's event, each in a fresh
    /// context. Failures are reported per entry point.
    pub fn fire(&self, trigger: ExecutionTrigger) -> Vec<Result<ExecutionResult, EvalError>> {
        let state = self.state.read();
        self.run(&state, &trigger)
    }

    /// Fire every subscribed event whose name matches a glob pattern
    pub fn fire_matching(
        &self,
        pattern: &str,
        trigger: ExecutionTrigger,
    ) -> Vec<Result<ExecutionResult, EvalError>> {
        let state = self.state.read();
        let matcher = WildMatch::new(pattern);
        let events: Vec<String> = state
            .program
            .events()
            .filter(|event| matcher.matches(event))
            .map(str::to_string)
            .collect();
        debug!(pattern, matched = events.len(), "Firing matching events");

        events
            .into_iter()
            .flat_map(|event| {
                let trigger = ExecutionTrigger {
                    event,
                    ..trigger.clone()
                };
                self.run(&state, &trigger)
            })
            .collect()
    }

    fn run(&self, state: &HostState, trigger: &ExecutionTrigger) -> Vec<Result<ExecutionResult, EvalError>> {
        let evaluator = Evaluator::with_options(&state.graph, &state.program, self.options);
        let entries = state.program.entry_points(&trigger.event);
        if entries.is_empty() {
            debug!(event = %trigger.event, "No entry points for event");
        }

        entries
            .iter()
            .map(|entry| {
                let mut ctx = ExecutionContext::new(trigger.clone());
                let outcome = evaluator.emit(&mut ctx, *entry);
                self.record(&trigger.event, ctx.steps(), outcome.is_err());
                match outcome {
                    Ok(()) => Ok(ctx.into_result()),
                    Err(e) => {
                        warn!(context = %ctx.id(), event = %trigger.event, error = %e, "Invocation failed");
                        Err(e)
                    }
                }
            })
            .collect()
    }

    fn record(&self, event: &str, steps: u64, failed: bool) {
        let mut stats = self.stats.entry(event.to_string()).or_default();
        stats.invocations += 1;
        stats.steps += steps;
        if failed {
            stats.failures += 1;
        }
    }

    /// Per-event counters, sorted by event name
    pub fn stats(&self) -> Vec<(String, EventStats)> {
        let mut stats: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn event_stats(&self, event: &str) -> Option<EventStats> {
        self.stats.get(event).map(|s| *s)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────────────────

    /// Inspect the graph under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.state.read().graph)
    }

    pub fn summary(&self) -> GraphSummary {
        self.read(GraphSummary::of)
    }

    /// Apply an unchecked edit, then recompile
    pub fn edit<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let result = f(&mut state.graph);
        state.program = Compiler::compile(&state.graph, &self.registry);
        result
    }

    /// Replace a function's signature; refused while any call site uses it
    pub fn redefine_function(&self, id: FunctionId, next: FunctionDef) -> Result<Option<FunctionId>, GraphError> {
        self.edit(|graph| {
            if graph.function_in_use(id) {
                return Err(in_use(graph.function(id).map(|f| f.def.name.as_str())));
            }
            graph.redefine_function(id, next)
        })
    }

    /// Delete a function; refused while any call site uses it
    pub fn remove_function(&self, id: FunctionId) -> Result<bool, GraphError> {
        self.edit(|graph| {
            if graph.function_in_use(id) {
                return Err(in_use(graph.function(id).map(|f| f.def.name.as_str())));
            }
            Ok(graph.remove_function(id))
        })
    }

    /// Replace a struct's fields; refused while anything refers to it
    pub fn redefine_struct(&self, id: StructId, next: StructType) -> Result<Option<StructId>, GraphError> {
        self.edit(|graph| {
            if graph.struct_in_use(id) {
                return Err(in_use(graph.struct_entry(id).map(|s| s.schema.name.as_str())));
            }
            graph.redefine_struct(id, next)
        })
    }

    /// Delete a struct; refused while anything refers to it
    pub fn remove_struct(&self, id: StructId) -> Result<bool, GraphError> {
        self.edit(|graph| {
            if graph.struct_in_use(id) {
                return Err(in_use(graph.struct_entry(id).map(|s| s.schema.name.as_str())));
            }
            Ok(graph.remove_struct(id))
        })
    }

    /// Swap in a new graph wholesale
    pub fn replace(&self, graph: Graph) {
        let program = Compiler::compile(&graph, &self.registry);
        *self.state.write() = HostState { graph, program };
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Load a graph file, replacing the current graph only if decoding succeeds
    pub fn load(&self, path: &Path) -> Result<LoadOutcome, PersistError> {
        let report = persistence::load_from_path(path, &self.registry)?;
        let outcome = LoadOutcome {
            version: report.version,
            dropped_nodes: report.dropped_nodes,
            dropped_wires: report.dropped_wires,
        };
        self.replace(report.graph);
        info!(path = %path.display(), version = outcome.version, "Installed graph");
        Ok(outcome)
    }

    /// Save the current graph, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let state = self.state.read();
        persistence::save_to_path(&state.graph, &self.registry, path)
    }
}

fn in_use(name: Option<&str>) -> GraphError {
    GraphError::IllegalEdit(name.unwrap_or_default().to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use blueprint_types::{Field, NodePorts, PortDef, Value, ValueType};
    use serde_json::json;

    use super::*;
    use crate::node::{InputRef, NodeConfig, NodeId, OutputRef, Position};
    use crate::registry::NodeDef;

    fn add(graph: &mut Graph, registry: &NodeRegistry, type_id: &str, config: NodeConfig) -> NodeId {
        graph
            .add_builtin(registry, type_id, config, Position::default())
            .unwrap()
    }

    fn wire(graph: &mut Graph, from: (NodeId, usize), to: (NodeId, usize)) {
        graph
            .connect(OutputRef::new(from.0, from.1), InputRef::new(to.0, to.1))
            .unwrap();
    }

    fn constant(graph: &mut Graph, registry: &NodeRegistry, value: Value) -> NodeId {
        add(graph, registry, "value/Constant", json!({ "value": serde_json::to_value(value).unwrap() }))
    }

    fn on(graph: &mut Graph, registry: &NodeRegistry, event: &str) -> NodeId {
        add(graph, registry, "event/On", json!({ "event": event }))
    }

    fn set(graph: &mut Graph, registry: &NodeRegistry, variable: &str, value_type: &str) -> NodeId {
        add(graph, registry, "var/Set", json!({ "variable": variable, "type": value_type }))
    }

    #[test]
    fn test_fan_out_evaluates_per_reader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = NodeRegistry::with_builtins();
        let counter = Arc::clone(&calls);
        registry.register_fn(
            NodeDef::new("test/Counter", "Test", "Counts its evaluations"),
            NodePorts::new(vec![], vec![PortDef::value("text", ValueType::Text)]),
            move |_scope| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from("tick"))
            },
        );

        let mut graph = Graph::new();
        let start = on(&mut graph, &registry, "tick");
        let source = add(&mut graph, &registry, "test/Counter", NodeConfig::Null);
        let mut previous = (start, 0);
        for _ in 0..3 {
            let log = add(&mut graph, &registry, "util/Log", NodeConfig::Null);
            wire(&mut graph, previous, (log, 0));
            wire(&mut graph, (source, 0), (log, 1));
            previous = (log, 0);
        }

        let host = ScriptHost::with_graph(Arc::new(registry), graph);
        let results = host.fire(ExecutionTrigger::new("tick"));
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_function_call_returns_result() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let double = graph
            .define_function(
                FunctionDef::new(
                    "double",
                    vec![Field::new("exec", ValueType::Signal), Field::new("x", ValueType::Number)],
                    vec![Field::new("done", ValueType::Signal), Field::new("y", ValueType::Number)],
                ),
                Position::default(),
            )
            .unwrap();
        let entry = graph.function(double).unwrap().input_node().unwrap();
        let exit = graph.function(double).unwrap().output_node().unwrap();
        let sum = add(&mut graph, &registry, "math/Add", NodeConfig::Null);
        wire(&mut graph, (entry, 1), (sum, 0));
        wire(&mut graph, (entry, 1), (sum, 1));
        wire(&mut graph, (sum, 0), (exit, 1));
        wire(&mut graph, (entry, 0), (exit, 0));

        let start = on(&mut graph, &registry, "go");
        let call = graph.add_call(double, Position::default()).unwrap();
        let x = constant(&mut graph, &registry, Value::from(21));
        let store = set(&mut graph, &registry, "result", "number");
        wire(&mut graph, (start, 0), (call, 0));
        wire(&mut graph, (x, 0), (call, 1));
        wire(&mut graph, (call, 0), (store, 0));
        wire(&mut graph, (call, 1), (store, 1));

        let host = ScriptHost::with_graph(Arc::new(registry), graph);
        let result = host.fire(ExecutionTrigger::new("go")).remove(0).unwrap();
        assert_eq!(result.variables.get("result"), Some(&Value::Number(42.0)));
    }

    #[test]
    fn test_recursion_is_bounded() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let forever = graph
            .define_function(
                FunctionDef::new("forever", vec![Field::new("exec", ValueType::Signal)], vec![]),
                Position::default(),
            )
            .unwrap();
        let entry = graph.function(forever).unwrap().input_node().unwrap();
        let inner = graph.add_call(forever, Position::default()).unwrap();
        wire(&mut graph, (entry, 0), (inner, 0));

        let start = on(&mut graph, &registry, "go");
        let outer = graph.add_call(forever, Position::default()).unwrap();
        wire(&mut graph, (start, 0), (outer, 0));

        let host = ScriptHost::with_graph(Arc::new(registry), graph)
            .with_options(EvaluatorOptions { max_call_depth: 16 });
        let err = host.fire(ExecutionTrigger::new("go")).remove(0).unwrap_err();
        assert_eq!(err, EvalError::CallDepthExceeded(16));
    }

    #[test]
    fn test_for_each_accumulates() {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_fn(
            NodeDef::new("test/Numbers", "Test", "The list [1, 2, 3]"),
            NodePorts::new(vec![], vec![PortDef::value("list", ValueType::list(ValueType::Number))]),
            |_scope| Ok(Value::from(vec![1, 2, 3])),
        );

        let mut graph = Graph::new();
        let start = on(&mut graph, &registry, "sum");
        let zero = constant(&mut graph, &registry, Value::from(0));
        let init = set(&mut graph, &registry, "total", "number");
        let numbers = add(&mut graph, &registry, "test/Numbers", NodeConfig::Null);
        let each = add(&mut graph, &registry, "flow/ForEach", json!({ "element": "number" }));
        let total = add(&mut graph, &registry, "var/Get", json!({ "variable": "total", "type": "number" }));
        let sum = add(&mut graph, &registry, "math/Add", NodeConfig::Null);
        let update = set(&mut graph, &registry, "total", "number");
        let done = constant(&mut graph, &registry, Value::from("done"));
        let message = add(&mut graph, &registry, "util/Message", NodeConfig::Null);

        wire(&mut graph, (start, 0), (init, 0));
        wire(&mut graph, (zero, 0), (init, 1));
        wire(&mut graph, (init, 0), (each, 0));
        wire(&mut graph, (numbers, 0), (each, 1));
        wire(&mut graph, (each, 0), (update, 0));
        wire(&mut graph, (total, 0), (sum, 0));
        wire(&mut graph, (each, 1), (sum, 1));
        wire(&mut graph, (sum, 0), (update, 1));
        wire(&mut graph, (each, 3), (message, 0));
        wire(&mut graph, (done, 0), (message, 1));

        let host = ScriptHost::with_graph(Arc::new(registry), graph);
        let result = host
            .fire(ExecutionTrigger::new("sum").with_player("alex"))
            .remove(0)
            .unwrap();
        assert_eq!(result.variables.get("total"), Some(&Value::Number(6.0)));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].to.as_deref(), Some("alex"));
        assert_eq!(result.messages[0].text, "done");
    }

    #[test]
    fn test_missing_value_is_an_invocation_fault() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let start = on(&mut graph, &registry, "join");
        let log = add(&mut graph, &registry, "util/Log", NodeConfig::Null);
        let message = add(&mut graph, &registry, "util/Message", NodeConfig::Null);
        wire(&mut graph, (start, 0), (log, 0));
        wire(&mut graph, (log, 0), (message, 0));

        let host = ScriptHost::with_graph(Arc::new(registry), graph);
        let err = host.fire(ExecutionTrigger::new("join")).remove(0).unwrap_err();
        // The log message falls back to its default; the message text has none
        assert_eq!(
            err,
            EvalError::MissingValue {
                node: message,
                input: "text".to_string()
            }
        );

        let stats = host.event_stats("join").unwrap();
        assert_eq!((stats.invocations, stats.failures), (1, 1));
        assert!(stats.steps >= 2);

        // The host keeps serving after a fault
        assert_eq!(host.fire(ExecutionTrigger::new("join")).len(), 1);
        assert_eq!(host.event_stats("join").unwrap().invocations, 2);
    }

    #[test]
    fn test_fire_matching_and_stats() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        for event in ["player.join", "player.quit", "tick"] {
            on(&mut graph, &registry, event);
        }
        let host = ScriptHost::with_graph(Arc::new(registry), graph);

        let results = host.fire_matching("player.*", ExecutionTrigger::default());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(host.fire(ExecutionTrigger::new("unknown")).is_empty());

        let names: Vec<String> = host.stats().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["player.join", "player.quit"]);
    }

    #[test]
    fn test_edit_recompiles() {
        let host = ScriptHost::new(Arc::new(NodeRegistry::with_builtins()));
        assert!(host.fire(ExecutionTrigger::new("go")).is_empty());

        let registry = Arc::clone(host.registry());
        host.edit(|graph| on(graph, &registry, "go"));
        assert_eq!(host.fire(ExecutionTrigger::new("go")).len(), 1);
    }

    #[test]
    fn test_definition_guard_leaves_graph_unchanged() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let mut graph = Graph::new();
        let f = graph
            .define_function(
                FunctionDef::new("greet", vec![Field::new("exec", ValueType::Signal)], vec![]),
                Position::default(),
            )
            .unwrap();
        graph.add_call(f, Position::new(500.0, 0.0)).unwrap();
        let point = graph
            .define_struct(
                blueprint_types::StructType::new("Point", vec![Field::new("x", ValueType::Number)]),
                Position::new(0.0, 200.0),
            )
            .unwrap();
        add(&mut graph, &registry, "struct/Get", json!({ "struct": "Point", "field": "x" }));
        let unused = graph
            .define_struct(blueprint_types::StructType::new("Unused", vec![]), Position::default())
            .unwrap();

        let host = ScriptHost::with_graph(registry, graph);
        let before = host.summary();

        let next = FunctionDef::new("greet", vec![], vec![]);
        assert!(matches!(host.redefine_function(f, next), Err(GraphError::IllegalEdit(_))));
        assert!(matches!(host.remove_function(f), Err(GraphError::IllegalEdit(_))));
        let next = blueprint_types::StructType::new("Point", vec![]);
        assert!(matches!(host.redefine_struct(point, next), Err(GraphError::IllegalEdit(_))));
        assert!(matches!(host.remove_struct(point), Err(GraphError::IllegalEdit(_))));
        assert_eq!(host.summary(), before);

        assert_eq!(host.remove_struct(unused), Ok(true));
        assert!(host.read(|g| g.struct_by_name("Unused").is_none()));
    }

    #[test]
    fn test_concurrent_contexts_are_isolated() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let start = on(&mut graph, &registry, "join");
        let remember = set(&mut graph, &registry, "who", "player");
        let greeting = constant(&mut graph, &registry, Value::from("welcome"));
        let message = add(&mut graph, &registry, "util/Message", NodeConfig::Null);
        wire(&mut graph, (start, 0), (remember, 0));
        wire(&mut graph, (start, 1), (remember, 1));
        wire(&mut graph, (remember, 0), (message, 0));
        wire(&mut graph, (greeting, 0), (message, 1));
        wire(&mut graph, (remember, 1), (message, 2));

        let host = Arc::new(ScriptHost::with_graph(Arc::new(registry), graph));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || {
                    let player = format!("player{}", i);
                    (0..25)
                        .map(|_| {
                            let result = host
                                .fire(ExecutionTrigger::new("join").with_player(player.clone()))
                                .remove(0)
                                .unwrap();
                            (player.clone(), result)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut contexts = std::collections::HashSet::new();
        for handle in handles {
            for (player, result) in handle.join().unwrap() {
                assert_eq!(result.variables.get("who"), Some(&Value::Player(player.clone())));
                assert_eq!(result.messages.len(), 1);
                assert_eq!(result.messages[0].to.as_deref(), Some(player.as_str()));
                contexts.insert(result.context);
            }
        }
        assert_eq!(contexts.len(), 200);
        assert_eq!(host.event_stats("join").unwrap().invocations, 200);
    }

    #[test]
    fn test_failed_load_keeps_graph() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let host = ScriptHost::new(Arc::clone(&registry));
        host.edit(|graph| on(graph, &registry, "go"));
        let before = host.summary();

        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.graph");
        std::fs::write(&garbage, [0u8, 0, 0, 3, 0, 0]).unwrap();
        assert!(matches!(host.load(&garbage), Err(PersistError::Decode(_))));
        assert!(host.load(&dir.path().join("absent.graph")).is_err());
        assert_eq!(host.summary(), before);

        let saved = dir.path().join("saved.graph");
        host.save(&saved).unwrap();
        let other = ScriptHost::new(registry);
        let outcome = other.load(&saved).unwrap();
        assert_eq!(outcome.dropped_nodes, 0);
        assert_eq!(other.summary(), before);
        assert_eq!(other.fire(ExecutionTrigger::new("go")).len(), 1);
    }

    #[test]
    fn test_unused_definitions_can_be_redefined() {
        let registry = Arc::new(NodeRegistry::with_builtins());
        let mut graph = Graph::new();
        let f = graph
            .define_function(FunctionDef::new("greet", vec![], vec![]), Position::default())
            .unwrap();
        let host = ScriptHost::with_graph(registry, graph);

        let next = FunctionDef::new("greet", vec![Field::new("exec", ValueType::Signal)], vec![]);
        let g = host.redefine_function(f, next.clone()).unwrap().unwrap();
        assert_eq!(host.redefine_function(f, next), Ok(None));
        assert!(host.read(|graph| graph.function(g).is_some_and(|e| e.def.inputs.len() == 1)));
    }
}
