// Graph Reader - Decodes the binary file format into a graph
//
// Loading is two-pass. The first pass materializes every node table entry in
// file order, leaving an empty placeholder for entries whose type or bound
// definition cannot be resolved, and records each wire as a pending connection.
// The second pass applies the pending connections, which may point forward in
// the table, and drops any that touch a placeholder.
//
// A node payload opens with the node's input insets; built-in nodes follow
// them with their own configuration. Payloads of unresolved nodes are skipped
// unread.

use bytes::Bytes;
use tracing::{info, warn};

use blueprint_types::codec::Reader;
use blueprint_types::{DecodeError, Field, StructType, Value, ValueType};

use super::migrations::MigrationChain;
use super::CURRENT_VERSION;
use crate::definitions::FunctionDef;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{
    InputRef, Node, NodeId, NodeKind, OutputRef, Position, KIND_BUILTIN, KIND_CALL, KIND_FUNCTION_INPUT,
    KIND_FUNCTION_OUTPUT, KIND_STRUCT,
};
use crate::registry::NodeRegistry;

/// A decoded graph and what had to be left out of it
#[derive(Debug)]
pub struct LoadReport {
    pub graph: Graph,
    /// Version the buffer was written at, before migration
    pub version: i32,
    pub dropped_nodes: usize,
    pub dropped_wires: usize,
}

/// A wire read from the node table, applied once every node exists
struct PendingWire {
    consumer: usize,
    input: usize,
    source: usize,
    output: usize,
    relays: Vec<Position>,
}

pub struct GraphReader<'r> {
    registry: &'r NodeRegistry,
    migrations: MigrationChain,
}

impl<'r> GraphReader<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self {
            registry,
            migrations: MigrationChain::default(),
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationChain) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn decode(&self, bytes: impl Into<Bytes>) -> Result<LoadReport, DecodeError> {
        let bytes = bytes.into();
        let original = Reader::new(bytes.clone()).i32()?;
        if !(0..=CURRENT_VERSION).contains(&original) {
            return Err(DecodeError::UnsupportedVersion(original));
        }

        let mut input = Reader::new(self.migrations.apply(bytes)?);
        let version = input.i32()?;
        if version != CURRENT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let mut graph = Graph::new();
        read_structs(&mut input, &mut graph)?;
        read_functions(&mut input, &mut graph)?;

        let count = input.count()?;
        let mut slots: Vec<Option<NodeId>> = Vec::with_capacity(count.min(input.remaining()));
        let mut pending = Vec::new();
        for index in 0..count {
            let node = self.read_node(&mut input, &mut graph, index, &mut pending)?;
            slots.push(node);
        }

        if !input.is_empty() {
            warn!(offset = input.offset(), trailing = input.remaining(), "Ignoring trailing bytes");
        }

        let mut dropped_wires = 0;
        for wire in pending {
            let consumer = slots.get(wire.consumer).copied().flatten();
            let source = slots.get(wire.source).copied().flatten();
            let (Some(consumer), Some(source)) = (consumer, source) else {
                dropped_wires += 1;
                continue;
            };
            if let Err(e) = graph.connect_with_relays(
                OutputRef::new(source, wire.output),
                InputRef::new(consumer, wire.input),
                wire.relays,
            ) {
                warn!(consumer = wire.consumer, source = wire.source, error = %e, "Dropping wire");
                dropped_wires += 1;
            }
        }

        graph
            .claim_boundaries()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let dropped_nodes = slots.iter().filter(|s| s.is_none()).count();
        info!(
            version = original,
            nodes = graph.node_count(),
            dropped_nodes,
            dropped_wires,
            "Loaded graph"
        );

        Ok(LoadReport {
            graph,
            version: original,
            dropped_nodes,
            dropped_wires,
        })
    }

    fn read_node(
        &self,
        input: &mut Reader,
        graph: &mut Graph,
        index: usize,
        pending: &mut Vec<PendingWire>,
    ) -> Result<Option<NodeId>, DecodeError> {
        let id = input.string()?;
        let kind = input.u8()?;
        let payload = input.blob()?;
        let position = Position::new(input.f64()?, input.f64()?);

        for slot in 0..input.count()? {
            for _ in 0..input.count()? {
                let source = input.count()?;
                let output = input.count()?;
                let mut relays = Vec::new();
                for _ in 0..input.count()? {
                    relays.push(Position::new(input.f64()?, input.f64()?));
                }
                pending.push(PendingWire {
                    consumer: index,
                    input: slot,
                    source,
                    output,
                    relays,
                });
            }
        }

        let structural = |graph: &Graph| -> Option<NodeKind> {
            match kind {
                KIND_CALL => graph.function_by_name(&id).map(|f| NodeKind::Call(f.id)),
                KIND_FUNCTION_INPUT => graph.function_by_name(&id).map(|f| NodeKind::FunctionInput(f.id)),
                KIND_FUNCTION_OUTPUT => graph.function_by_name(&id).map(|f| NodeKind::FunctionOutput(f.id)),
                KIND_STRUCT => graph.struct_by_name(&id).map(|s| NodeKind::StructBoundary(s.id)),
                _ => None,
            }
        };

        let mut payload = Reader::new(payload);
        let resolved = if kind == KIND_BUILTIN {
            match self.registry.get_behavior(&id) {
                Some(behavior) => {
                    let insets = read_insets(&mut payload)?;
                    let config = behavior.read_data(&mut payload, &*graph)?;
                    behavior.ports(&config, &*graph).map(|ports| {
                        let node = graph.insert_node(Node::new(NodeKind::Builtin(id.clone()), config, ports, position));
                        (node, insets)
                    })
                }
                None => Err(GraphError::UnknownNodeType(id.clone())),
            }
        } else {
            match structural(&*graph) {
                Some(node_kind) => {
                    let insets = read_insets(&mut payload)?;
                    graph.add_structural(node_kind, position).map(|node| (node, insets))
                }
                None => Err(GraphError::UnresolvedReference(id.clone())),
            }
        };

        match resolved {
            Ok((node, insets)) => {
                for (slot, value) in insets {
                    if let Err(e) = graph.set_inset(InputRef::new(node, slot), Some(value)) {
                        warn!(index, slot, error = %e, "Dropping inset");
                    }
                }
                Ok(Some(node))
            }
            Err(e) => {
                warn!(index, id = %id, kind, error = %e, "Dropping unresolved node");
                Ok(None)
            }
        }
    }
}

/// `count:int` then `(slot:int, value)` pairs
fn read_insets(payload: &mut Reader) -> Result<Vec<(usize, Value)>, DecodeError> {
    let count = payload.count()?;
    let mut insets = Vec::with_capacity(count.min(payload.remaining()));
    for _ in 0..count {
        let slot = payload.count()?;
        insets.push((slot, Value::decode(payload)?));
    }
    Ok(insets)
}

fn read_fields(input: &mut Reader, graph: &Graph) -> Result<Vec<Field>, DecodeError> {
    let count = input.count()?;
    let mut fields = Vec::with_capacity(count.min(input.remaining()));
    for _ in 0..count {
        let name = input.string()?;
        fields.push(Field::new(name, ValueType::decode(input, graph)?));
    }
    Ok(fields)
}

/// Struct fields may only name structs that appear earlier in the table
fn read_structs(input: &mut Reader, graph: &mut Graph) -> Result<(), DecodeError> {
    for _ in 0..input.count()? {
        let name = input.string()?;
        let field_count = input.u8()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field = input.string()?;
            fields.push(Field::new(field, ValueType::decode(input, &*graph)?));
        }
        graph
            .register_struct(StructType::new(name.clone(), fields))
            .map_err(|_| DecodeError::DuplicateDefinition(name))?;
    }
    Ok(())
}

fn read_functions(input: &mut Reader, graph: &mut Graph) -> Result<(), DecodeError> {
    for _ in 0..input.count()? {
        let name = input.string()?;
        let inputs = read_fields(input, graph)?;
        let outputs = read_fields(input, graph)?;
        graph
            .register_function(FunctionDef::new(name.clone(), inputs, outputs))
            .map_err(|_| DecodeError::DuplicateDefinition(name))?;
    }
    Ok(())
}
