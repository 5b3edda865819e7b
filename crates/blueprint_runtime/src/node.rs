// Node Model - Node instances, ports and wires
//
// Nodes live in the graph arena and are addressed by `NodeId`. Ports are
// addressed by (node, slot) and never hold pointers to other nodes; a wire is
// stored on the consuming input and mirrored on the producing output's target
// list so both directions can be walked cheaply.

use std::fmt;

use serde::{Deserialize, Serialize};

use blueprint_types::{NodePorts, PortDef, Value, ValueType};

use crate::definitions::{FunctionId, StructId};

/// Opaque per-node configuration for built-in nodes
pub type NodeConfig = serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Stable arena index of a node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of an output port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub slot: usize,
}

impl OutputRef {
    pub fn new(node: NodeId, slot: usize) -> Self {
        Self { node, slot }
    }
}

/// Address of an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
    pub node: NodeId,
    pub slot: usize,
}

impl InputRef {
    pub fn new(node: NodeId, slot: usize) -> Self {
        Self { node, slot }
    }
}

/// Position in the visual editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// What a node is, and the persistence kind byte for each variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum NodeKind {
    /// Registry node type, by id
    Builtin(String),
    /// Invocation of a function
    Call(FunctionId),
    /// Exposes a function's inputs inside its body
    FunctionInput(FunctionId),
    /// Collects a function's outputs inside its body
    FunctionOutput(FunctionId),
    /// Constructs an instance of a struct
    StructBoundary(StructId),
}

pub const KIND_BUILTIN: u8 = 0;
pub const KIND_CALL: u8 = 1;
pub const KIND_FUNCTION_INPUT: u8 = 2;
pub const KIND_FUNCTION_OUTPUT: u8 = 3;
pub const KIND_STRUCT: u8 = 4;

impl NodeKind {
    pub fn kind_byte(&self) -> u8 {
        match self {
            NodeKind::Builtin(_) => KIND_BUILTIN,
            NodeKind::Call(_) => KIND_CALL,
            NodeKind::FunctionInput(_) => KIND_FUNCTION_INPUT,
            NodeKind::FunctionOutput(_) => KIND_FUNCTION_OUTPUT,
            NodeKind::StructBoundary(_) => KIND_STRUCT,
        }
    }

    pub fn function(&self) -> Option<FunctionId> {
        match self {
            NodeKind::Call(id) | NodeKind::FunctionInput(id) | NodeKind::FunctionOutput(id) => {
                Some(*id)
            }
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ports and Wires
// ─────────────────────────────────────────────────────────────────────────────

/// A connection from an output into the input that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    pub source: OutputRef,
    /// Routing waypoints, presentation only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<Position>,
}

#[derive(Debug, Clone)]
pub struct InputPort {
    pub def: PortDef,
    /// One wire for value inputs; signal inputs may be driven from several outputs
    pub(crate) wires: Vec<Wire>,
    /// Literal typed in on this instance; read when nothing is wired in
    pub(crate) inset: Option<Value>,
}

impl InputPort {
    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    pub fn inset(&self) -> Option<&Value> {
        self.inset.as_ref()
    }

    /// The output feeding this input, for value inputs
    pub fn source(&self) -> Option<OutputRef> {
        self.wires.first().map(|w| w.source)
    }
}

#[derive(Debug, Clone)]
pub struct OutputPort {
    pub def: PortDef,
    /// Inputs reading this output; at most one for signal outputs
    pub(crate) targets: Vec<InputRef>,
}

impl OutputPort {
    pub fn targets(&self) -> &[InputRef] {
        &self.targets
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

/// A node instance within a graph
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    pub position: Position,
    config: NodeConfig,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, config: NodeConfig, ports: NodePorts, position: Position) -> Self {
        Self {
            kind,
            position,
            config,
            inputs: ports
                .inputs
                .into_iter()
                .map(|def| InputPort {
                    def,
                    wires: Vec::new(),
                    inset: None,
                })
                .collect(),
            outputs: ports
                .outputs
                .into_iter()
                .map(|def| OutputPort {
                    def,
                    targets: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn input(&self, slot: usize) -> Option<&InputPort> {
        self.inputs.get(slot)
    }

    pub fn output(&self, slot: usize) -> Option<&OutputPort> {
        self.outputs.get(slot)
    }

    pub(crate) fn input_mut(&mut self, slot: usize) -> Option<&mut InputPort> {
        self.inputs.get_mut(slot)
    }

    pub(crate) fn output_mut(&mut self, slot: usize) -> Option<&mut OutputPort> {
        self.outputs.get_mut(slot)
    }

    /// Port declarations, as a renderer needs them
    pub fn ports(&self) -> NodePorts {
        NodePorts::new(
            self.inputs.iter().map(|p| p.def.clone()).collect(),
            self.outputs.iter().map(|p| p.def.clone()).collect(),
        )
    }

    /// Whether any port type mentions the named struct
    pub fn references_struct(&self, name: &str) -> bool {
        let mentions = |t: &ValueType| t.references_struct(name);
        self.inputs.iter().any(|p| mentions(&p.def.value_type))
            || self.outputs.iter().any(|p| mentions(&p.def.value_type))
    }
}
