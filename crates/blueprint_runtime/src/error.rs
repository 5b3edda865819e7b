//! Error types for graph editing, evaluation and persistence.

use blueprint_types::DecodeError;

use crate::compiler::EntryPoint;
use crate::node::NodeId;

/// Errors raised by graph edits and connections
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("Unresolved reference to '{0}'")]
    UnresolvedReference(String),

    #[error("Node {node} has no {direction} port {slot}")]
    NoSuchPort {
        node: NodeId,
        slot: usize,
        direction: &'static str,
    },

    #[error("Cannot connect {found} output to {expected} input")]
    TypeMismatch { expected: String, found: String },

    #[error("Wire would make node {0} depend on its own value")]
    ValueLoop(NodeId),

    #[error("Definition '{0}' is in use and cannot be changed")]
    IllegalEdit(String),

    #[error("A definition named '{0}' already exists")]
    DuplicateDefinition(String),

    #[error("Definition '{0}' does not exist")]
    UnknownDefinition(String),

    #[error("Node {0} is owned by a definition and cannot be removed directly")]
    BoundaryNode(NodeId),

    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while evaluating a single invocation.
///
/// These abort the invocation that raised them and nothing else.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("Input '{input}' of node {node} is not connected and has no default")]
    MissingValue { node: NodeId, input: String },

    #[error("Variable '{0}' has not been set")]
    UnsetVariable(String),

    #[error("Trigger carries no {0}")]
    MissingTriggerData(&'static str),

    #[error("Node {node} expected {expected}, got {found}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Function boundary {0} evaluated outside of its function")]
    OutsideFunction(NodeId),

    #[error("Call depth exceeded {0}")]
    CallDepthExceeded(usize),

    #[error("Unknown entry point {0:?}")]
    UnknownEntryPoint(EntryPoint),

    #[error("Node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("Node {node} has no value output {slot}")]
    NotAValueOutput { node: NodeId, slot: usize },

    #[error("Node {node} has no signal input {slot}")]
    NotASignalInput { node: NodeId, slot: usize },

    #[error("Node {node} failed: {message}")]
    NodeFault { node: NodeId, message: String },
}

/// Errors raised by loading and saving graph files
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to decode graph: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph cannot be written as version {version}: {reason}")]
    Unrepresentable { version: i32, reason: String },
}
