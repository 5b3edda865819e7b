//! Versioned binary persistence of graphs
//!
//! Layout (big-endian, strings are `len:int` + UTF-8):
//!
//! ```text
//! version:int
//! structs:   count:int, { name, fieldCount:byte, { name, type } }
//! functions: count:int, { name, inputCount:int, { name, type }, outputCount:int, { name, type } }
//! nodes:     count:int, { id, kind:byte, payload:blob, x:double, y:double,
//!                         inputCount:int, { wireCount:int, { source:int, output:int,
//!                         relayCount:int, { x:double, y:double } } } }
//! payload:   insetCount:int, { slot:int, value }, node configuration
//! ```
//!
//! Node payloads are length-prefixed so an entry whose type is unknown can be
//! skipped without understanding it. Structs are written after every struct
//! their fields mention.

mod migrations;
mod reader;
mod writer;

use std::io::Write;
use std::path::Path;

use bytes::Bytes;
use tracing::{error, info};

use blueprint_types::DecodeError;

pub use migrations::{AddFunctionTable, AddInputInsets, AddStructTable, AddWireRelays, Migration, MigrationChain};
pub use reader::{GraphReader, LoadReport};
pub use writer::GraphWriter;

use crate::error::PersistError;
use crate::graph::Graph;
use crate::registry::NodeRegistry;

/// First version with a function table and node kind bytes
pub const VERSION_FUNCTIONS: i32 = 1;
/// First version with a struct table
pub const VERSION_STRUCTS: i32 = 2;
/// First version with relay points on wires
pub const VERSION_RELAYS: i32 = 3;
/// First version with input insets in node payloads
pub const VERSION_INSETS: i32 = 4;

pub const CURRENT_VERSION: i32 = VERSION_INSETS;

/// Encode a graph at the current version
pub fn encode(graph: &Graph, registry: &NodeRegistry) -> Result<Bytes, PersistError> {
    GraphWriter::new(registry).encode(graph)
}

/// Decode a buffer of any supported version
pub fn decode(bytes: impl Into<Bytes>, registry: &NodeRegistry) -> Result<LoadReport, DecodeError> {
    GraphReader::new(registry).decode(bytes)
}

/// Read and decode a graph file
pub fn load_from_path(path: &Path, registry: &NodeRegistry) -> Result<LoadReport, PersistError> {
    let bytes = std::fs::read(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to read graph");
        e
    })?;
    decode(bytes, registry).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to decode graph");
        PersistError::Decode(e)
    })
}

/// Encode a graph and replace the file at `path` atomically.
///
/// The buffer is written to a temporary file next to the target and renamed
/// over it, so a failed save leaves the existing file as it was.
pub fn save_to_path(graph: &Graph, registry: &NodeRegistry, path: &Path) -> Result<(), PersistError> {
    let bytes = encode(graph, registry)?;
    write_atomic(path, &bytes).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to save graph");
        PersistError::Io(e)
    })?;
    info!(path = %path.display(), size = bytes.len(), "Saved graph");
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blueprint_types::codec::Writer;
    use blueprint_types::{Field, StructLookup, StructType, Value, ValueType};
    use serde_json::json;

    use super::*;
    use crate::definitions::FunctionDef;
    use crate::node::{InputRef, NodeConfig, NodeId, OutputRef, Position};
    use crate::summary::GraphSummary;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_builtins()
    }

    fn constant(graph: &mut Graph, registry: &NodeRegistry, value: Value, x: f64) -> NodeId {
        graph
            .add_builtin(
                registry,
                "value/Constant",
                json!({ "value": serde_json::to_value(value).unwrap() }),
                Position::new(x, 0.0),
            )
            .unwrap()
    }

    /// Built-in nodes only, representable at every version
    fn builtin_graph(registry: &NodeRegistry) -> Graph {
        let mut graph = Graph::new();
        let on = graph
            .add_builtin(registry, "event/On", json!({ "event": "join" }), Position::new(0.0, 0.0))
            .unwrap();
        let text = constant(&mut graph, registry, Value::from("welcome"), 50.0);
        let log = graph
            .add_builtin(registry, "util/Log", json!({ "level": "warn" }), Position::new(100.0, 0.0))
            .unwrap();
        let seq = graph
            .add_builtin(registry, "flow/Sequence", json!({ "outputs": 3 }), Position::new(200.0, 0.0))
            .unwrap();
        graph.connect(OutputRef::new(on, 0), InputRef::new(log, 0)).unwrap();
        graph.connect(OutputRef::new(text, 0), InputRef::new(log, 1)).unwrap();
        graph.connect(OutputRef::new(log, 0), InputRef::new(seq, 0)).unwrap();
        graph
    }

    /// Adds a function with a body and a call site
    fn function_graph(registry: &NodeRegistry) -> Graph {
        let mut graph = builtin_graph(registry);
        let f = graph
            .define_function(
                FunctionDef::new(
                    "double",
                    vec![Field::new("exec", ValueType::Signal), Field::new("x", ValueType::Number)],
                    vec![Field::new("done", ValueType::Signal), Field::new("y", ValueType::Number)],
                ),
                Position::new(0.0, 300.0),
            )
            .unwrap();
        let entry = graph.function(f).unwrap().input_node().unwrap();
        let exit = graph.function(f).unwrap().output_node().unwrap();
        let add = graph
            .add_builtin(registry, "math/Add", NodeConfig::Null, Position::new(200.0, 300.0))
            .unwrap();
        graph.connect(OutputRef::new(entry, 1), InputRef::new(add, 0)).unwrap();
        graph.connect(OutputRef::new(entry, 1), InputRef::new(add, 1)).unwrap();
        graph.connect(OutputRef::new(add, 0), InputRef::new(exit, 1)).unwrap();
        graph.connect(OutputRef::new(entry, 0), InputRef::new(exit, 0)).unwrap();

        let call = graph.add_call(f, Position::new(300.0, 0.0)).unwrap();
        let seven = constant(&mut graph, registry, Value::from(7), 250.0);
        graph.connect(OutputRef::new(seven, 0), InputRef::new(call, 1)).unwrap();
        graph
    }

    /// Adds structs, including one nested in another
    fn struct_graph(registry: &NodeRegistry) -> Graph {
        let mut graph = function_graph(registry);
        graph
            .define_struct(
                StructType::new("Point", vec![Field::new("x", ValueType::Number), Field::new("y", ValueType::Number)]),
                Position::new(0.0, 600.0),
            )
            .unwrap();
        let point = graph.lookup_struct("Point").unwrap();
        graph
            .define_struct(
                StructType::new(
                    "Path",
                    vec![Field::new("points", ValueType::list(ValueType::structure(point)))],
                ),
                Position::new(0.0, 700.0),
            )
            .unwrap();
        let get = graph
            .add_builtin(
                registry,
                "struct/Get",
                json!({ "struct": "Point", "field": "y" }),
                Position::new(300.0, 600.0),
            )
            .unwrap();
        let boundary = graph.struct_by_name("Point").unwrap().boundary().unwrap();
        graph.connect(OutputRef::new(boundary, 0), InputRef::new(get, 0)).unwrap();
        graph
    }

    fn with_relays(mut graph: Graph) -> Graph {
        let (log, text) = {
            let mut builtins = graph.nodes().map(|(id, _)| id);
            let _on = builtins.next().unwrap();
            let text = builtins.next().unwrap();
            let log = builtins.next().unwrap();
            (log, text)
        };
        graph
            .connect_with_relays(
                OutputRef::new(text, 0),
                InputRef::new(log, 1),
                vec![Position::new(60.0, 40.0), Position::new(80.0, 40.0)],
            )
            .unwrap();
        graph
    }

    /// Literal insets on a built-in node and on a struct constructor
    fn with_insets(mut graph: Graph, registry: &NodeRegistry) -> Graph {
        let multiply = graph
            .add_builtin(registry, "math/Multiply", NodeConfig::Null, Position::new(400.0, 300.0))
            .unwrap();
        graph.set_inset(InputRef::new(multiply, 1), Some(Value::from(3))).unwrap();
        let boundary = graph.struct_by_name("Point").unwrap().boundary().unwrap();
        graph.set_inset(InputRef::new(boundary, 0), Some(Value::from(1.5))).unwrap();
        graph
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let graph = with_insets(with_relays(struct_graph(&registry)), &registry);

        let bytes = encode(&graph, &registry).unwrap();
        let report = decode(bytes, &registry).unwrap();

        assert_eq!(report.version, CURRENT_VERSION);
        assert_eq!(report.dropped_nodes, 0);
        assert_eq!(report.dropped_wires, 0);
        assert_eq!(GraphSummary::of(&report.graph), GraphSummary::of(&graph));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let registry = registry();
        let graph = with_insets(with_relays(struct_graph(&registry)), &registry);

        let first = encode(&graph, &registry).unwrap();
        let reloaded = decode(first.clone(), &registry).unwrap().graph;
        let second = encode(&reloaded, &registry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_migration_chain_for_every_version() {
        let registry = registry();
        // Graph representable at N-1, for N = 1 to 4
        let graphs = [
            builtin_graph(&registry),
            function_graph(&registry),
            struct_graph(&registry),
            with_relays(struct_graph(&registry)),
        ];

        for (previous, graph) in graphs.iter().enumerate() {
            let previous = previous as i32;
            let legacy = GraphWriter::new(&registry)
                .with_version(previous)
                .encode(graph)
                .unwrap();
            let current = GraphWriter::new(&registry)
                .with_version(previous + 1)
                .encode(graph)
                .unwrap();

            let from_legacy = decode(legacy, &registry).unwrap();
            let from_current = decode(current, &registry).unwrap();
            assert_eq!(from_legacy.version, previous);
            assert_eq!(
                GraphSummary::of(&from_legacy.graph),
                GraphSummary::of(&from_current.graph),
                "version {} did not migrate to {}",
                previous,
                previous + 1
            );
            assert_eq!(GraphSummary::of(&from_current.graph), GraphSummary::of(graph));
        }
    }

    #[test]
    fn test_legacy_writer_refuses_definitions() {
        let registry = registry();
        let graph = struct_graph(&registry);
        let err = GraphWriter::new(&registry).with_version(1).encode(&graph).unwrap_err();
        assert!(matches!(err, PersistError::Unrepresentable { version: 1, .. }));

        let graph = function_graph(&registry);
        let err = GraphWriter::new(&registry).with_version(0).encode(&graph).unwrap_err();
        assert!(matches!(err, PersistError::Unrepresentable { version: 0, .. }));

        let graph = with_insets(struct_graph(&registry), &registry);
        let err = GraphWriter::new(&registry).with_version(3).encode(&graph).unwrap_err();
        assert!(matches!(err, PersistError::Unrepresentable { version: 3, .. }));
    }

    #[test]
    fn test_inset_on_missing_port_is_dropped() {
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0);
        w.count(0);
        w.count(1);
        w.string("math/Add");
        w.u8(0);
        let mut payload = Writer::new();
        payload.count(2);
        payload.count(0);
        Value::from(2).encode(&mut payload);
        payload.count(9);
        Value::from(3).encode(&mut payload);
        w.blob(&payload.finish());
        w.f64(0.0);
        w.f64(0.0);
        w.count(0);

        let report = decode(w.finish(), &registry()).unwrap();
        let add = report.graph.input_port(InputRef::new(NodeId(0), 0)).unwrap();
        assert_eq!(add.inset(), Some(&Value::from(2)));
        assert_eq!(report.graph.node_count(), 1);
    }

    #[test]
    fn test_value_loop_in_file_is_dropped() {
        // Two adders, each reading the other
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0);
        w.count(0);
        w.count(2);
        for other in [1, 0] {
            w.string("math/Add");
            w.u8(0);
            w.blob(&[0, 0, 0, 0]);
            w.f64(0.0);
            w.f64(0.0);
            w.count(1);
            w.count(1);
            w.count(other);
            w.count(0);
            w.count(0);
        }

        let report = decode(w.finish(), &registry()).unwrap();
        assert_eq!(report.graph.node_count(), 2);
        assert_eq!(report.dropped_wires, 1);
    }

    #[test]
    fn test_redefined_struct_round_trips() {
        let registry = registry();
        let mut graph = Graph::new();
        let a = graph
            .define_struct(StructType::new("A", vec![]), Position::default())
            .unwrap();
        graph
            .define_struct(StructType::new("B", vec![Field::new("n", ValueType::Number)]), Position::default())
            .unwrap();
        let b = graph.lookup_struct("B").unwrap();
        graph
            .redefine_struct(a, StructType::new("A", vec![Field::new("b", ValueType::structure(b))]))
            .unwrap()
            .unwrap();

        let report = decode(encode(&graph, &registry).unwrap(), &registry).unwrap();
        assert_eq!(GraphSummary::of(&report.graph), GraphSummary::of(&graph));
        let names: Vec<_> = report.graph.structs().iter().map(|s| s.schema.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_writer_refuses_struct_ahead_of_its_field_type() {
        let registry = registry();
        let mut graph = Graph::new();
        let ghost = Arc::new(StructType::new("Ghost", vec![]));
        graph
            .register_struct(StructType::new("Holder", vec![Field::new("g", ValueType::structure(ghost))]))
            .unwrap();
        let err = encode(&graph, &registry).unwrap_err();
        assert!(matches!(err, PersistError::Unrepresentable { .. }));
    }

    #[test]
    fn test_deeply_nested_function_type_is_malformed() {
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0);
        w.count(1);
        w.string("f");
        w.count(1);
        w.string("p");
        let mut bytes = w.finish().to_vec();
        bytes.extend(std::iter::repeat_n(5u8, 2_000_000));

        let err = decode(bytes, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_forward_reference() {
        let registry = registry();
        let mut graph = Graph::new();
        let add = graph
            .add_builtin(&registry, "math/Add", NodeConfig::Null, Position::default())
            .unwrap();
        let mut last = add;
        for i in 1..=5 {
            last = constant(&mut graph, &registry, Value::from(i), i as f64);
        }
        assert_eq!((add, last), (NodeId(0), NodeId(5)));
        graph.connect(OutputRef::new(last, 0), InputRef::new(add, 0)).unwrap();

        let report = decode(encode(&graph, &registry).unwrap(), &registry).unwrap();
        let input = report.graph.input_port(InputRef::new(NodeId(0), 0)).unwrap();
        assert_eq!(input.source(), Some(OutputRef::new(NodeId(5), 0)));
    }

    #[test]
    fn test_unregistered_builtin_is_dropped() {
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0);
        w.count(0);
        w.count(3);

        // 0: a known constant
        w.string("value/Constant");
        w.u8(0);
        let mut payload = Writer::new();
        payload.count(0);
        Value::from(4).encode(&mut payload);
        w.blob(&payload.finish());
        w.f64(0.0);
        w.f64(0.0);
        w.count(0);

        // 1: unknown type with an opaque payload, wired from node 0
        w.string("plugin/Teleport");
        w.u8(0);
        w.blob(&[1, 2, 3, 4, 5]);
        w.f64(10.0);
        w.f64(0.0);
        w.count(1);
        w.count(1);
        w.count(0);
        w.count(0);
        w.count(0);

        // 2: math/Add reading node 0
        w.string("math/Add");
        w.u8(0);
        w.blob(&[0, 0, 0, 0]);
        w.f64(20.0);
        w.f64(0.0);
        w.count(2);
        w.count(1);
        w.count(0);
        w.count(0);
        w.count(0);
        w.count(0);

        let report = decode(w.finish(), &registry()).unwrap();
        assert_eq!(report.graph.node_count(), 2);
        assert_eq!(report.dropped_nodes, 1);
        assert_eq!(report.dropped_wires, 1);

        let add = report
            .graph
            .nodes()
            .find(|(_, n)| n.position.x == 20.0)
            .map(|(id, _)| id)
            .unwrap();
        assert!(report.graph.input_port(InputRef::new(add, 0)).unwrap().source().is_some());
    }

    #[test]
    fn test_call_to_missing_function_is_dropped() {
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0);
        w.count(0);
        w.count(1);
        w.string("ghost");
        w.u8(crate::node::KIND_CALL);
        w.blob(&[0, 0, 0, 0]);
        w.f64(0.0);
        w.f64(0.0);
        w.count(0);

        let report = decode(w.finish(), &registry()).unwrap();
        assert_eq!(report.graph.node_count(), 0);
        assert_eq!(report.dropped_nodes, 1);
    }

    #[test]
    fn test_unknown_struct_reference() {
        let mut w = Writer::new();
        w.i32(CURRENT_VERSION);
        w.count(0); // no structs
        w.count(1);
        w.string("f");
        w.count(1);
        w.string("p");
        ValueType::structure(Arc::new(StructType::new("Ghost", vec![]))).encode(&mut w);
        w.count(0);
        w.count(0);

        let err = decode(w.finish(), &registry()).unwrap_err();
        assert_eq!(err, DecodeError::UnknownStructReference("Ghost".to_string()));
    }

    #[test]
    fn test_malformed_buffers() {
        let registry = registry();
        let bytes = encode(&struct_graph(&registry), &registry).unwrap();

        let err = decode(bytes.slice(..bytes.len() - 5), &registry).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));

        let mut w = Writer::new();
        w.i32(99);
        w.count(0);
        assert_eq!(decode(w.finish(), &registry).unwrap_err(), DecodeError::UnsupportedVersion(99));

        assert!(matches!(decode(Vec::<u8>::new(), &registry), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_save_and_load_file() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.graph");
        let graph = struct_graph(&registry);

        save_to_path(&graph, &registry, &path).unwrap();
        let report = load_from_path(&path, &registry).unwrap();
        assert_eq!(GraphSummary::of(&report.graph), GraphSummary::of(&graph));
    }

    #[test]
    fn test_failed_save_leaves_file_untouched() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.graph");
        std::fs::write(&path, b"previous").unwrap();

        // A graph the current layout refuses never reaches the disk
        let mut graph = Graph::new();
        let fields = (0..300).map(|i| Field::new(format!("f{}", i), ValueType::Number)).collect();
        graph
            .define_struct(StructType::new("Wide", fields), Position::default())
            .unwrap();
        assert!(save_to_path(&graph, &registry, &path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");

        // Nor does a save into a missing directory create anything
        let missing = dir.path().join("missing").join("world.graph");
        assert!(matches!(
            save_to_path(&builtin_graph(&registry), &registry, &missing),
            Err(PersistError::Io(_))
        ));
        assert!(!missing.exists());
    }
}
