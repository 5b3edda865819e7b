// Graph Writer - Encodes a graph into the binary file format
//
// The current layout is always the default. Older layouts can be requested for
// export; anything the older layout cannot express is refused rather than
// silently dropped, except relay points, which are presentation only.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tracing::debug;

use blueprint_types::codec::Writer;
use blueprint_types::Field;

use super::{CURRENT_VERSION, VERSION_FUNCTIONS, VERSION_INSETS, VERSION_RELAYS, VERSION_STRUCTS};
use crate::error::PersistError;
use crate::graph::Graph;
use crate::node::{NodeId, NodeKind};
use crate::registry::NodeRegistry;
use crate::summary::node_key;

pub struct GraphWriter<'r> {
    registry: &'r NodeRegistry,
    version: i32,
}

impl<'r> GraphWriter<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self {
            registry,
            version: CURRENT_VERSION,
        }
    }

    /// Write an older layout instead of the current one
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    fn refuse(&self, reason: impl Into<String>) -> PersistError {
        PersistError::Unrepresentable {
            version: self.version,
            reason: reason.into(),
        }
    }

    fn check(&self, graph: &Graph) -> Result<(), PersistError> {
        if !(0..=CURRENT_VERSION).contains(&self.version) {
            return Err(self.refuse("unknown version"));
        }
        if self.version < VERSION_STRUCTS && !graph.structs().is_empty() {
            return Err(self.refuse("struct definitions"));
        }
        if self.version < VERSION_FUNCTIONS {
            if !graph.functions().is_empty() {
                return Err(self.refuse("function definitions"));
            }
            if graph
                .nodes()
                .any(|(_, n)| !matches!(n.kind(), NodeKind::Builtin(_)))
            {
                return Err(self.refuse("nodes bound to definitions"));
            }
        }
        if self.version < VERSION_INSETS
            && graph
                .nodes()
                .any(|(_, n)| n.inputs().iter().any(|p| p.inset().is_some()))
        {
            return Err(self.refuse("input insets"));
        }
        if let Some(s) = graph.structs().iter().find(|s| s.schema.fields.len() > u8::MAX as usize) {
            return Err(self.refuse(format!("struct {} has too many fields", s.schema.name)));
        }
        self.check_struct_order(graph)
    }

    /// The reader resolves a struct reference only against structs already read
    fn check_struct_order(&self, graph: &Graph) -> Result<(), PersistError> {
        let mut written: HashSet<&str> = HashSet::new();
        for entry in graph.structs() {
            if let Some(missing) = first_unwritten(&entry.schema.fields, &written) {
                return Err(self.refuse(format!(
                    "struct {} refers to {} ahead of its definition",
                    entry.schema.name, missing
                )));
            }
            written.insert(&entry.schema.name);
        }
        for entry in graph.functions() {
            if let Some(missing) = first_unwritten(entry.def.inputs.iter().chain(&entry.def.outputs), &written) {
                return Err(self.refuse(format!(
                    "function {} refers to undefined struct {}",
                    entry.def.name, missing
                )));
            }
        }
        Ok(())
    }

    pub fn encode(&self, graph: &Graph) -> Result<Bytes, PersistError> {
        self.check(graph)?;
        let mut out = Writer::new();
        out.i32(self.version);

        if self.version >= VERSION_STRUCTS {
            out.count(graph.structs().len());
            for entry in graph.structs() {
                out.string(&entry.schema.name);
                out.u8(entry.schema.fields.len() as u8);
                for field in &entry.schema.fields {
                    out.string(&field.name);
                    field.value_type.encode(&mut out);
                }
            }
        }

        if self.version >= VERSION_FUNCTIONS {
            out.count(graph.functions().len());
            for entry in graph.functions() {
                out.string(&entry.def.name);
                write_fields(&entry.def.inputs, &mut out);
                write_fields(&entry.def.outputs, &mut out);
            }
        }

        self.write_nodes(graph, &mut out)?;

        let bytes = out.finish();
        debug!(version = self.version, size = bytes.len(), "Encoded graph");
        Ok(bytes)
    }

    fn write_nodes(&self, graph: &Graph, out: &mut Writer) -> Result<(), PersistError> {
        let index: HashMap<NodeId, usize> = graph
            .nodes()
            .enumerate()
            .map(|(i, (id, _))| (id, i))
            .collect();

        out.count(index.len());
        for (id, node) in graph.nodes() {
            let key = node_key(graph, node.kind())
                .ok_or_else(|| self.refuse(format!("node {} is bound to a missing definition", id)))?;
            out.string(&key);
            if self.version >= VERSION_FUNCTIONS {
                out.u8(node.kind().kind_byte());
            }

            let mut payload = Writer::new();
            if self.version >= VERSION_INSETS {
                let insets: Vec<_> = node
                    .inputs()
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, port)| port.inset().map(|value| (slot, value)))
                    .collect();
                payload.count(insets.len());
                for (slot, value) in insets {
                    payload.count(slot);
                    value.encode(&mut payload);
                }
            }
            if let NodeKind::Builtin(type_id) = node.kind() {
                if let Some(behavior) = self.registry.get_behavior(type_id) {
                    behavior.write_data(node.config(), &mut payload);
                }
            }
            out.blob(&payload.finish());

            out.f64(node.position.x);
            out.f64(node.position.y);

            out.count(node.inputs().len());
            for input in node.inputs() {
                let wires: Vec<_> = input
                    .wires()
                    .iter()
                    .filter_map(|w| index.get(&w.source.node).map(|source| (*source, w)))
                    .collect();
                out.count(wires.len());
                for (source, wire) in wires {
                    out.count(source);
                    out.count(wire.source.slot);
                    if self.version >= VERSION_RELAYS {
                        out.count(wire.relays.len());
                        for relay in &wire.relays {
                            out.f64(relay.x);
                            out.f64(relay.y);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn first_unwritten<'a>(fields: impl IntoIterator<Item = &'a Field>, written: &HashSet<&str>) -> Option<String> {
    fields
        .into_iter()
        .filter_map(|f| f.value_type.struct_schema())
        .find(|schema| !written.contains(schema.name.as_str()))
        .map(|schema| schema.name.clone())
}

fn write_fields(fields: &[Field], out: &mut Writer) {
    out.count(fields.len());
    for field in fields {
        out.string(&field.name);
        field.value_type.encode(out);
    }
}
