// Graph - Arena of nodes plus the user-authored definitions they bind to
//
// Nodes are stored in a growable arena and addressed by stable index; a removed
// node leaves an empty slot so other indices never shift. Every wire is kept on
// both ends (consumer input and producer output) and all edits go through the
// graph so the two views never disagree.
//
// Port rules:
// - a value input has at most one source; connecting a new one replaces it
// - a signal output has at most one target; connecting a new one supersedes it
// - value outputs fan out, signal inputs fan in
// - value wires never form a loop, since pulling one would never finish
//
// Structs are kept in dependency order: every struct follows the structs its
// fields mention, which is the order the file format needs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use blueprint_types::codec::{Reader, Writer};
use blueprint_types::{NodePorts, StructLookup, StructType, Value, ValueType};

use crate::definitions::{struct_ports, FunctionDef, FunctionEntry, FunctionId, StructEntry, StructId};
use crate::error::GraphError;
use crate::node::{InputPort, InputRef, Node, NodeConfig, NodeId, NodeKind, OutputPort, OutputRef, Position, Wire};
use crate::registry::NodeRegistry;

/// Horizontal gap between a new function's two boundary nodes
const BOUNDARY_SPACING: f64 = 400.0;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    functions: Vec<FunctionEntry>,
    structs: Vec<StructEntry>,
    next_definition: u32,
}

impl StructLookup for Graph {
    fn lookup_struct(&self, name: &str) -> Option<Arc<StructType>> {
        self.struct_by_name(name).map(|s| s.schema.clone())
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Node Access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }

    /// Live nodes in arena order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0 && self.functions.is_empty() && self.structs.is_empty()
    }

    pub fn input_port(&self, at: InputRef) -> Result<&InputPort, GraphError> {
        self.node(at.node)
            .ok_or(GraphError::UnknownNode(at.node))?
            .input(at.slot)
            .ok_or(GraphError::NoSuchPort {
                node: at.node,
                slot: at.slot,
                direction: "input",
            })
    }

    pub fn output_port(&self, at: OutputRef) -> Result<&OutputPort, GraphError> {
        self.node(at.node)
            .ok_or(GraphError::UnknownNode(at.node))?
            .output(at.slot)
            .ok_or(GraphError::NoSuchPort {
                node: at.node,
                slot: at.slot,
                direction: "output",
            })
    }

    /// The input a signal output currently drives
    pub fn signal_target(&self, at: OutputRef) -> Option<InputRef> {
        self.output_port(at).ok()?.targets.first().copied()
    }

    /// Nodes whose position lies inside the rectangle spanned by two corners
    pub fn nodes_in_region(&self, a: Position, b: Position) -> Vec<NodeId> {
        let (min_x, max_x) = (a.x.min(b.x), a.x.max(b.x));
        let (min_y, max_y) = (a.y.min(b.y), a.y.max(b.y));
        self.nodes()
            .filter(|(_, n)| {
                (min_x..=max_x).contains(&n.position.x) && (min_y..=max_y).contains(&n.position.y)
            })
            .map(|(id, _)| id)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Node Editing
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn insert_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    /// Add a registry node, declaring its ports from `config`
    pub fn add_builtin(
        &mut self,
        registry: &NodeRegistry,
        type_id: &str,
        config: NodeConfig,
        position: Position,
    ) -> Result<NodeId, GraphError> {
        let behavior = registry
            .get_behavior(type_id)
            .ok_or_else(|| GraphError::UnknownNodeType(type_id.to_string()))?;
        behavior.ports(&config, &*self)?;

        // Canonicalize through the payload encoding so a saved node reloads identically
        let mut payload = Writer::new();
        behavior.write_data(&config, &mut payload);
        let config = behavior
            .read_data(&mut Reader::new(payload.finish()), &*self)
            .map_err(|e| GraphError::InvalidConfig(e.to_string()))?;

        let ports = behavior.ports(&config, &*self)?;
        let id = self.insert_node(Node::new(
            NodeKind::Builtin(type_id.to_string()),
            config,
            ports,
            position,
        ));
        debug!(node = %id, node_type = type_id, "Added node");
        Ok(id)
    }

    /// Add a call site of a function
    pub fn add_call(&mut self, function: FunctionId, position: Position) -> Result<NodeId, GraphError> {
        self.add_structural(NodeKind::Call(function), position)
    }

    /// Add a constructor of a struct
    pub fn add_constructor(&mut self, structure: StructId, position: Position) -> Result<NodeId, GraphError> {
        self.add_structural(NodeKind::StructBoundary(structure), position)
    }

    /// Add a node whose ports come from a definition
    pub(crate) fn add_structural(&mut self, kind: NodeKind, position: Position) -> Result<NodeId, GraphError> {
        let ports = self.structural_ports(&kind)?;
        Ok(self.insert_node(Node::new(kind, NodeConfig::Null, ports, position)))
    }

    fn structural_ports(&self, kind: &NodeKind) -> Result<NodePorts, GraphError> {
        let function = |id: &FunctionId| {
            self.function(*id)
                .map(|f| f.def.clone())
                .ok_or_else(|| GraphError::UnresolvedReference(id.to_string()))
        };
        match kind {
            NodeKind::Call(id) => Ok(function(id)?.call_ports()),
            NodeKind::FunctionInput(id) => Ok(function(id)?.input_boundary_ports()),
            NodeKind::FunctionOutput(id) => Ok(function(id)?.output_boundary_ports()),
            NodeKind::StructBoundary(id) => self
                .struct_entry(*id)
                .map(|s| struct_ports(&s.schema))
                .ok_or_else(|| GraphError::UnresolvedReference(id.to_string())),
            NodeKind::Builtin(type_id) => Err(GraphError::UnknownNodeType(type_id.clone())),
        }
    }

    pub fn move_node(&mut self, id: NodeId, position: Position) -> Result<(), GraphError> {
        self.node_mut(id).ok_or(GraphError::UnknownNode(id))?.position = position;
        Ok(())
    }

    /// Remove a node and every wire touching it
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        if self.owns(id) {
            return Err(GraphError::BoundaryNode(id));
        }
        self.detach_node(id).ok_or(GraphError::UnknownNode(id))
    }

    fn owns(&self, id: NodeId) -> bool {
        self.functions
            .iter()
            .any(|f| f.input_node == Some(id) || f.output_node == Some(id))
            || self.structs.iter().any(|s| s.boundary == Some(id))
    }

    fn detach_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        for (slot, input) in node.inputs().iter().enumerate() {
            let consumer = InputRef::new(id, slot);
            for wire in input.wires() {
                if let Some(port) = self.output_port_mut(wire.source) {
                    port.targets.retain(|t| *t != consumer);
                }
            }
        }
        for (slot, output) in node.outputs().iter().enumerate() {
            let producer = OutputRef::new(id, slot);
            for target in output.targets() {
                if let Some(port) = self.input_port_mut(*target) {
                    port.wires.retain(|w| w.source != producer);
                }
            }
        }
        debug!(node = %id, "Removed node");
        Some(node)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wiring
    // ─────────────────────────────────────────────────────────────────────────

    fn input_port_mut(&mut self, at: InputRef) -> Option<&mut InputPort> {
        self.node_mut(at.node)?.input_mut(at.slot)
    }

    fn output_port_mut(&mut self, at: OutputRef) -> Option<&mut OutputPort> {
        self.node_mut(at.node)?.output_mut(at.slot)
    }

    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<(), GraphError> {
        self.connect_with_relays(from, to, Vec::new())
    }

    /// Connect an output to an input, replacing whatever the port rules displace
    pub fn connect_with_relays(
        &mut self,
        from: OutputRef,
        to: InputRef,
        relays: Vec<Position>,
    ) -> Result<(), GraphError> {
        let found = self.output_port(from)?.def.value_type.clone();
        let expected = self.input_port(to)?.def.value_type.clone();
        if found != expected {
            return Err(GraphError::TypeMismatch {
                expected: expected.display_name(),
                found: found.display_name(),
            });
        }
        if !found.is_signal() && self.depends_on(from.node, to.node) {
            return Err(GraphError::ValueLoop(to.node));
        }

        let displaced: Vec<(OutputRef, InputRef)> = if found.is_signal() {
            self.output_port(from)?
                .targets
                .iter()
                .map(|t| (from, *t))
                .collect()
        } else {
            self.input_port(to)?
                .wires
                .iter()
                .map(|w| (w.source, to))
                .collect()
        };
        for (source, target) in displaced {
            self.unlink(source, target);
        }
        // Signal inputs fan in, so an identical wire may survive the sweep above
        self.unlink(from, to);

        if let Some(port) = self.input_port_mut(to) {
            port.wires.push(Wire {
                source: from,
                relays,
            });
        }
        if let Some(port) = self.output_port_mut(from) {
            port.targets.push(to);
        }
        Ok(())
    }

    /// Remove the wire between two ports, if present. A value input also
    /// loses its inset.
    pub fn disconnect(&mut self, from: OutputRef, to: InputRef) -> bool {
        let linked = self
            .output_port(from)
            .map(|p| p.targets.contains(&to))
            .unwrap_or(false);
        self.unlink(from, to);
        if linked {
            if let Some(port) = self.input_port_mut(to) {
                if !port.def.value_type.is_signal() {
                    port.inset = None;
                }
            }
        }
        linked
    }

    /// Set or clear the literal an input reads when nothing is wired into it
    pub fn set_inset(&mut self, at: InputRef, value: Option<Value>) -> Result<(), GraphError> {
        let expected = &self.input_port(at)?.def.value_type;
        if let Some(value) = &value {
            if !expected.accepts(value) {
                return Err(GraphError::TypeMismatch {
                    expected: expected.display_name(),
                    found: value.kind_name().to_string(),
                });
            }
        }
        if let Some(port) = self.input_port_mut(at) {
            port.inset = value;
        }
        Ok(())
    }

    /// Whether pulling a value out of `node` could end up evaluating `target`
    fn depends_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            let Some(n) = self.node(current) else {
                continue;
            };
            for input in n.inputs().iter().filter(|p| !p.def.value_type.is_signal()) {
                stack.extend(input.wires().iter().map(|w| w.source.node));
            }
        }
        false
    }

    fn unlink(&mut self, from: OutputRef, to: InputRef) {
        if let Some(port) = self.input_port_mut(to) {
            port.wires.retain(|w| w.source != from);
        }
        if let Some(port) = self.output_port_mut(from) {
            port.targets.retain(|t| *t != to);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Definitions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn functions(&self) -> &[FunctionEntry] {
        &self.functions
    }

    pub fn structs(&self) -> &[StructEntry] {
        &self.structs
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionEntry> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.iter().find(|f| f.def.name == name)
    }

    pub fn struct_entry(&self, id: StructId) -> Option<&StructEntry> {
        self.structs.iter().find(|s| s.id == id)
    }

    pub fn struct_by_name(&self, name: &str) -> Option<&StructEntry> {
        self.structs.iter().find(|s| s.schema.name == name)
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_definition;
        self.next_definition += 1;
        id
    }

    /// Register a function without creating its boundary nodes
    pub(crate) fn register_function(&mut self, def: FunctionDef) -> Result<FunctionId, GraphError> {
        if self.function_by_name(&def.name).is_some() {
            return Err(GraphError::DuplicateDefinition(def.name));
        }
        let id = FunctionId(self.next_id());
        self.functions.push(FunctionEntry {
            id,
            def: Arc::new(def),
            input_node: None,
            output_node: None,
        });
        Ok(id)
    }

    /// Register a struct without creating its boundary node
    pub(crate) fn register_struct(&mut self, schema: StructType) -> Result<StructId, GraphError> {
        if self.struct_by_name(&schema.name).is_some() {
            return Err(GraphError::DuplicateDefinition(schema.name));
        }
        let id = StructId(self.next_id());
        self.structs.push(StructEntry {
            id,
            schema: Arc::new(schema),
            boundary: None,
        });
        Ok(id)
    }

    /// Reject types that mention an unregistered struct, or a struct that leads
    /// back to one of `defining`
    fn check_struct_references<'a>(
        &self,
        types: impl IntoIterator<Item = &'a ValueType>,
        defining: &[&str],
    ) -> Result<(), GraphError> {
        for schema in types.into_iter().filter_map(ValueType::struct_schema) {
            let name = schema.name.as_str();
            if self.struct_by_name(name).is_none() || self.struct_reaches(name, defining) {
                return Err(GraphError::UnresolvedReference(name.to_string()));
            }
        }
        Ok(())
    }

    /// Whether the named struct is one of `targets` or mentions one through its fields
    fn struct_reaches(&self, from: &str, targets: &[&str]) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(name) = stack.pop() {
            if targets.contains(&name.as_str()) {
                return true;
            }
            let Some(entry) = self.struct_by_name(&name) else {
                continue;
            };
            if seen.insert(name) {
                stack.extend(
                    entry
                        .schema
                        .fields
                        .iter()
                        .filter_map(|f| f.value_type.struct_schema())
                        .map(|s| s.name.clone()),
                );
            }
        }
        false
    }

    /// Move every struct after the structs its fields mention, keeping the
    /// existing order otherwise
    fn order_structs(&mut self) {
        let mut pending = std::mem::take(&mut self.structs);
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|s| {
                    s.schema.fields.iter().all(|f| match f.value_type.struct_schema() {
                        Some(r) => !pending.iter().any(|p| p.schema.name == r.name),
                        None => true,
                    })
                })
                .unwrap_or(0);
            self.structs.push(pending.remove(ready));
        }
    }

    /// Define a function and place its two boundary nodes
    pub fn define_function(&mut self, def: FunctionDef, position: Position) -> Result<FunctionId, GraphError> {
        self.check_struct_references(def.inputs.iter().chain(&def.outputs).map(|f| &f.value_type), &[])?;
        let id = self.register_function(def)?;
        let input = self.add_structural(NodeKind::FunctionInput(id), position)?;
        let output = self.add_structural(
            NodeKind::FunctionOutput(id),
            Position::new(position.x + BOUNDARY_SPACING, position.y),
        )?;
        if let Some(entry) = self.functions.iter_mut().find(|f| f.id == id) {
            entry.input_node = Some(input);
            entry.output_node = Some(output);
        }
        Ok(id)
    }

    /// Define a struct and place its constructor node
    pub fn define_struct(&mut self, schema: StructType, position: Position) -> Result<StructId, GraphError> {
        if self.struct_by_name(&schema.name).is_some() {
            return Err(GraphError::DuplicateDefinition(schema.name));
        }
        self.check_struct_references(schema.fields.iter().map(|f| &f.value_type), &[schema.name.as_str()])?;
        let id = self.register_struct(schema)?;
        let boundary = self.add_structural(NodeKind::StructBoundary(id), position)?;
        if let Some(entry) = self.structs.iter_mut().find(|s| s.id == id) {
            entry.boundary = Some(boundary);
        }
        Ok(id)
    }

    /// Give every definition its owned boundary nodes, adopting existing ones first
    pub(crate) fn claim_boundaries(&mut self) -> Result<(), GraphError> {
        for index in 0..self.functions.len() {
            let id = self.functions[index].id;
            if self.functions[index].input_node.is_none() {
                let node = self.adopt_or_create(NodeKind::FunctionInput(id))?;
                self.functions[index].input_node = Some(node);
            }
            if self.functions[index].output_node.is_none() {
                let node = self.adopt_or_create(NodeKind::FunctionOutput(id))?;
                self.functions[index].output_node = Some(node);
            }
        }
        for index in 0..self.structs.len() {
            if self.structs[index].boundary.is_none() {
                let id = self.structs[index].id;
                let node = self.adopt_or_create(NodeKind::StructBoundary(id))?;
                self.structs[index].boundary = Some(node);
            }
        }
        Ok(())
    }

    fn adopt_or_create(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        let found = self.nodes().find(|(_, n)| *n.kind() == kind).map(|(id, _)| id);
        match found {
            Some(id) => Ok(id),
            None => self.add_structural(kind, Position::default()),
        }
    }

    /// A function is in use while any call site is bound to it
    pub fn function_in_use(&self, id: FunctionId) -> bool {
        self.nodes().any(|(_, n)| *n.kind() == NodeKind::Call(id))
    }

    /// A struct is in use while anything other than its own boundary node refers to it
    pub fn struct_in_use(&self, id: StructId) -> bool {
        let Some(entry) = self.struct_entry(id) else {
            return false;
        };
        let name = entry.schema.name.as_str();

        let nodes = self.nodes().any(|(node_id, n)| {
            Some(node_id) != entry.boundary
                && (*n.kind() == NodeKind::StructBoundary(id) || n.references_struct(name))
        });
        let functions = self.functions.iter().any(|f| f.def.references_struct(name));
        let structs = self.structs.iter().any(|s| {
            s.id != id
                && s.schema
                    .fields
                    .iter()
                    .any(|f| f.value_type.references_struct(name))
        });
        nodes || functions || structs
    }

    /// Replace a function's signature, migrating its boundary nodes to fresh ones.
    ///
    /// Does not check [`Graph::function_in_use`]; callers that need the guard go
    /// through the host. Returns `None` when `previous` is not defined.
    pub fn redefine_function(
        &mut self,
        previous: FunctionId,
        next: FunctionDef,
    ) -> Result<Option<FunctionId>, GraphError> {
        let Some(index) = self.functions.iter().position(|f| f.id == previous) else {
            return Ok(None);
        };
        if self
            .functions
            .iter()
            .any(|f| f.id != previous && f.def.name == next.name)
        {
            return Err(GraphError::DuplicateDefinition(next.name));
        }
        self.check_struct_references(next.inputs.iter().chain(&next.outputs).map(|f| &f.value_type), &[])?;

        let old = self.functions[index].clone();
        let id = FunctionId(self.next_id());
        self.functions[index] = FunctionEntry {
            id,
            def: Arc::new(next),
            input_node: None,
            output_node: None,
        };

        let bound: Vec<NodeId> = self
            .nodes()
            .filter(|(_, n)| n.kind().function() == Some(previous))
            .map(|(node_id, _)| node_id)
            .collect();
        for node_id in bound {
            let Some(node) = self.detach_node(node_id) else {
                continue;
            };
            let kind = match node.kind() {
                NodeKind::Call(_) => NodeKind::Call(id),
                NodeKind::FunctionInput(_) => NodeKind::FunctionInput(id),
                NodeKind::FunctionOutput(_) => NodeKind::FunctionOutput(id),
                _ => continue,
            };
            let replacement = self.add_structural(kind, node.position)?;
            let entry = &mut self.functions[index];
            if old.input_node == Some(node_id) {
                entry.input_node = Some(replacement);
            } else if old.output_node == Some(node_id) {
                entry.output_node = Some(replacement);
            }
        }

        self.claim_boundaries()?;
        debug!(function = %self.functions[index].def.name, "Redefined function");
        Ok(Some(id))
    }

    /// Delete a function together with every node bound to it
    pub fn remove_function(&mut self, id: FunctionId) -> bool {
        let Some(index) = self.functions.iter().position(|f| f.id == id) else {
            return false;
        };
        let entry = self.functions.remove(index);
        let bound: Vec<NodeId> = self
            .nodes()
            .filter(|(_, n)| n.kind().function() == Some(id))
            .map(|(node_id, _)| node_id)
            .collect();
        for node_id in bound {
            self.detach_node(node_id);
        }
        debug!(function = %entry.def.name, "Removed function");
        true
    }

    /// Replace a struct's schema, migrating its constructor nodes to fresh ones.
    ///
    /// Like [`Graph::redefine_function`] this is the unchecked edit.
    pub fn redefine_struct(
        &mut self,
        previous: StructId,
        next: StructType,
    ) -> Result<Option<StructId>, GraphError> {
        let Some(index) = self.structs.iter().position(|s| s.id == previous) else {
            return Ok(None);
        };
        if self
            .structs
            .iter()
            .any(|s| s.id != previous && s.schema.name == next.name)
        {
            return Err(GraphError::DuplicateDefinition(next.name));
        }
        let old_name = self.structs[index].schema.name.clone();
        self.check_struct_references(
            next.fields.iter().map(|f| &f.value_type),
            &[next.name.as_str(), old_name.as_str()],
        )?;

        let old = self.structs[index].clone();
        let id = StructId(self.next_id());
        self.structs[index] = StructEntry {
            id,
            schema: Arc::new(next),
            boundary: None,
        };

        let bound: Vec<NodeId> = self
            .nodes()
            .filter(|(_, n)| *n.kind() == NodeKind::StructBoundary(previous))
            .map(|(node_id, _)| node_id)
            .collect();
        for node_id in bound {
            let Some(node) = self.detach_node(node_id) else {
                continue;
            };
            let replacement = self.add_structural(NodeKind::StructBoundary(id), node.position)?;
            if old.boundary == Some(node_id) {
                self.structs[index].boundary = Some(replacement);
            }
        }

        self.claim_boundaries()?;
        self.order_structs();
        debug!(structure = %old_name, id = %id, "Redefined struct");
        Ok(Some(id))
    }

    /// Delete a struct together with its constructor nodes
    pub fn remove_struct(&mut self, id: StructId) -> bool {
        let Some(index) = self.structs.iter().position(|s| s.id == id) else {
            return false;
        };
        let entry = self.structs.remove(index);
        let bound: Vec<NodeId> = self
            .nodes()
            .filter(|(_, n)| *n.kind() == NodeKind::StructBoundary(id))
            .map(|(node_id, _)| node_id)
            .collect();
        for node_id in bound {
            self.detach_node(node_id);
        }
        debug!(structure = %entry.schema.name, "Removed struct");
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
