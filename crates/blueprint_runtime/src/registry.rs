// Node Registry - Stores node definitions and their behaviors
//
// The registry holds every built-in node type by id. Each type has catalog
// metadata (name, category) and a behavior that declares ports from the node's
// configuration, persists that configuration, and evaluates/executes the node.
// The registry is an explicit value handed to the graph, compiler and decoder.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use blueprint_types::codec::{Reader, Writer};
use blueprint_types::{DecodeError, NodePorts, StructLookup, Value};

use crate::compiler::Compiler;
use crate::error::{EvalError, GraphError};
use crate::evaluator::{Flow, Scope};
use crate::node::{NodeConfig, NodeId};

// ─────────────────────────────────────────────────────────────────────────────
// Node Behavior Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Semantics of a built-in node type
pub trait NodeBehavior: Send + Sync {
    /// Declare ports from the node's own configuration
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError>;

    /// Persist the node configuration as an opaque payload
    fn write_data(&self, _config: &NodeConfig, _out: &mut Writer) {}

    /// Restore a configuration written by [`NodeBehavior::write_data`]
    fn read_data(
        &self,
        _input: &mut Reader,
        _structs: &dyn StructLookup,
    ) -> Result<NodeConfig, DecodeError> {
        Ok(NodeConfig::Null)
    }

    /// Compile-time hook: mark entry points and allocate variable slots
    fn register(&self, _node: NodeId, _config: &NodeConfig, _compiler: &mut Compiler) {}

    /// Produce the value of a (non-signal) output
    fn evaluate(&self, scope: &mut Scope<'_, '_>, output: usize) -> Result<Value, EvalError> {
        Err(EvalError::NotAValueOutput {
            node: scope.node(),
            slot: output,
        })
    }

    /// Run the node after control reaches one of its signal inputs
    fn execute(&self, scope: &mut Scope<'_, '_>, input: usize) -> Result<Flow, EvalError> {
        Err(EvalError::NotASignalInput {
            node: scope.node(),
            slot: input,
        })
    }
}

/// Pure single-output node backed by a closure (for simple nodes)
pub struct FnNode<F>
where
    F: Fn(&mut Scope<'_, '_>) -> Result<Value, EvalError> + Send + Sync,
{
    ports: NodePorts,
    func: F,
}

impl<F> FnNode<F>
where
    F: Fn(&mut Scope<'_, '_>) -> Result<Value, EvalError> + Send + Sync,
{
    pub fn new(ports: NodePorts, func: F) -> Self {
        Self { ports, func }
    }
}

impl<F> NodeBehavior for FnNode<F>
where
    F: Fn(&mut Scope<'_, '_>) -> Result<Value, EvalError> + Send + Sync,
{
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(self.ports.clone())
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, output: usize) -> Result<Value, EvalError> {
        if output != 0 {
            return Err(EvalError::NotAValueOutput {
                node: scope.node(),
                slot: output,
            });
        }
        (self.func)(scope)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog metadata for a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique id, e.g. "flow/Branch"
    pub id: String,
    /// Display name
    pub name: String,
    pub category: String,
    /// Pure nodes have no signal ports
    #[serde(default)]
    pub pure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeDef {
    pub fn new(id: &str, category: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.rsplit('/').next().unwrap_or(id).to_string(),
            category: category.to_string(),
            pure: false,
            description: Some(description.to_string()),
        }
    }

    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }
}

/// Entry in the node registry
struct NodeEntry {
    definition: NodeDef,
    behavior: Arc<dyn NodeBehavior>,
}

/// Registry of all available node types
pub struct NodeRegistry {
    nodes: HashMap<String, NodeEntry>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in catalog
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtin_nodes(&mut registry);
        registry
    }

    /// Register a node type with its behavior
    pub fn register(&mut self, definition: NodeDef, behavior: Arc<dyn NodeBehavior>) {
        let id = definition.id.clone();
        self.nodes.insert(id, NodeEntry {
            definition,
            behavior,
        });
    }

    /// Register a pure node with fixed ports and a single computed output
    pub fn register_fn<F>(&mut self, definition: NodeDef, ports: NodePorts, func: F)
    where
        F: Fn(&mut Scope<'_, '_>) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.register(definition.pure(), Arc::new(FnNode::new(ports, func)));
    }

    /// Get a node definition by ID
    pub fn get_definition(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.get(id).map(|e| &e.definition)
    }

    /// Get a node behavior by ID
    pub fn get_behavior(&self, id: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.nodes.get(id).map(|e| Arc::clone(&e.behavior))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Get nodes by category
    pub fn nodes_in_category(&self, category: &str) -> Vec<&NodeDef> {
        let mut defs: Vec<_> = self
            .nodes
            .values()
            .filter(|e| e.definition.category == category)
            .map(|e| &e.definition)
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Get all categories
    pub fn categories(&self) -> Vec<&str> {
        let mut cats: Vec<_> = self
            .nodes
            .values()
            .map(|e| e.definition.category.as_str())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use blueprint_types::{PortDef, StructType, ValueType};

    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register_fn(
            NodeDef::new("test/One", "Test", "Always one"),
            NodePorts::new(vec![], vec![PortDef::value("out", ValueType::Number)]),
            |_| Ok(Value::from(1)),
        );

        assert!(registry.contains("test/One"));
        assert_eq!(registry.len(), 1);
        let def = registry.get_definition("test/One").unwrap();
        assert_eq!(def.name, "One");
        assert!(def.pure);

        let behavior = registry.get_behavior("test/One").unwrap();
        let structs: Vec<Arc<StructType>> = Vec::new();
        let ports = behavior.ports(&NodeConfig::Null, &structs).unwrap();
        assert_eq!(ports.outputs.len(), 1);
    }

    #[test]
    fn test_builtin_catalog() {
        let registry = NodeRegistry::with_builtins();
        assert!(registry.contains("event/On"));
        assert!(registry.contains("flow/Branch"));
        assert!(registry.contains("math/Add"));
        assert!(registry.categories().contains(&"Math"));
        assert!(!registry.nodes_in_category("Flow Control").is_empty());
    }
}
