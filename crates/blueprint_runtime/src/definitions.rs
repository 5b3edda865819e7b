//! User-authored definitions: functions and structs
//!
//! A definition owns one or two boundary nodes in the graph. Its identity is a
//! graph-local id; a redefinition always mints a fresh id so that nodes bound
//! to the previous signature can be told apart from nodes bound to the new one.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use blueprint_types::{Field, NodePorts, PortDef, StructType, ValueType};

use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "struct{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Function Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Signature of a user-authored function
///
/// Signal entries in `inputs` are entry points into the body; signal entries in
/// `outputs` are the ways control can leave it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, inputs: Vec<Field>, outputs: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    fn port_defs(fields: &[Field]) -> Vec<PortDef> {
        fields.iter().map(PortDef::from).collect()
    }

    /// Ports of a call site: the signature as seen from outside
    pub fn call_ports(&self) -> NodePorts {
        NodePorts::new(Self::port_defs(&self.inputs), Self::port_defs(&self.outputs))
    }

    /// Ports of the input boundary: the function inputs become outputs in the body
    pub fn input_boundary_ports(&self) -> NodePorts {
        NodePorts::new(Vec::new(), Self::port_defs(&self.inputs))
    }

    /// Ports of the output boundary: the function outputs are collected as inputs
    pub fn output_boundary_ports(&self) -> NodePorts {
        NodePorts::new(Self::port_defs(&self.outputs), Vec::new())
    }

    pub fn references_struct(&self, name: &str) -> bool {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .any(|f| f.value_type.references_struct(name))
    }
}

/// A function registered in a graph, with its owned boundary nodes
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub id: FunctionId,
    pub def: Arc<FunctionDef>,
    pub(crate) input_node: Option<NodeId>,
    pub(crate) output_node: Option<NodeId>,
}

impl FunctionEntry {
    pub fn input_node(&self) -> Option<NodeId> {
        self.input_node
    }

    pub fn output_node(&self) -> Option<NodeId> {
        self.output_node
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Struct Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Ports of a struct constructor node: one input per field, the instance out
pub fn struct_ports(schema: &Arc<StructType>) -> NodePorts {
    NodePorts::new(
        schema.fields.iter().map(PortDef::from).collect(),
        vec![PortDef::value(
            &schema.name,
            ValueType::structure(schema.clone()),
        )],
    )
}

/// A struct registered in a graph, with its owned boundary node
#[derive(Debug, Clone)]
pub struct StructEntry {
    pub id: StructId,
    pub schema: Arc<StructType>,
    pub(crate) boundary: Option<NodeId>,
}

impl StructEntry {
    pub fn boundary(&self) -> Option<NodeId> {
        self.boundary
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ports_mirror_signature() {
        let def = FunctionDef::new(
            "double",
            vec![Field::new("exec", ValueType::Signal), Field::new("x", ValueType::Number)],
            vec![Field::new("done", ValueType::Signal), Field::new("y", ValueType::Number)],
        );

        let call = def.call_ports();
        assert_eq!(call.inputs.len(), 2);
        assert_eq!(call.outputs.len(), 2);

        let input = def.input_boundary_ports();
        assert!(input.inputs.is_empty());
        assert_eq!(input.outputs, call.inputs);

        let output = def.output_boundary_ports();
        assert!(output.outputs.is_empty());
        assert_eq!(output.inputs, call.outputs);
    }

    #[test]
    fn test_struct_ports() {
        let schema = Arc::new(StructType::new(
            "Point",
            vec![Field::new("x", ValueType::Number), Field::new("y", ValueType::Number)],
        ));
        let ports = struct_ports(&schema);
        assert_eq!(ports.inputs.len(), 2);
        assert_eq!(ports.outputs[0].value_type, ValueType::structure(schema));
    }

    #[test]
    fn test_references_struct() {
        let schema = Arc::new(StructType::new("Team", vec![]));
        let def = FunctionDef::new(
            "f",
            vec![Field::new("teams", ValueType::list(ValueType::structure(schema)))],
            vec![],
        );
        assert!(def.references_struct("Team"));
        assert!(!def.references_struct("Other"));
    }
}
