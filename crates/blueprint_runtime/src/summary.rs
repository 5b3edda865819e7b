//! Serializable snapshot of a graph's structure
//!
//! Nodes are numbered densely in arena order, which is the order the file format
//! writes them in, so two graphs with equal summaries encode identically.

use std::collections::HashMap;

use serde::Serialize;

use blueprint_types::Value;

use crate::graph::Graph;
use crate::node::{NodeConfig, NodeId, NodeKind, Position};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub structs: Vec<DefinitionSummary>,
    pub functions: Vec<DefinitionSummary>,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefinitionSummary {
    pub name: String,
    pub inputs: Vec<PortSummary>,
    /// Empty for structs
    pub outputs: Vec<PortSummary>,
    pub in_use: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSummary {
    pub source: usize,
    pub output: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inset: Option<Value>,
    pub wires: Vec<WireSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub index: usize,
    pub kind: &'static str,
    /// Type id for built-ins, definition name otherwise
    pub id: String,
    pub position: Position,
    #[serde(skip_serializing_if = "NodeConfig::is_null")]
    pub config: NodeConfig,
    pub inputs: Vec<InputSummary>,
    pub outputs: Vec<PortSummary>,
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Builtin(_) => "builtin",
        NodeKind::Call(_) => "call",
        NodeKind::FunctionInput(_) => "function_input",
        NodeKind::FunctionOutput(_) => "function_output",
        NodeKind::StructBoundary(_) => "struct",
    }
}

/// Name a node is persisted under
pub(crate) fn node_key(graph: &Graph, kind: &NodeKind) -> Option<String> {
    match kind {
        NodeKind::Builtin(type_id) => Some(type_id.clone()),
        NodeKind::Call(id) | NodeKind::FunctionInput(id) | NodeKind::FunctionOutput(id) => {
            graph.function(*id).map(|f| f.def.name.clone())
        }
        NodeKind::StructBoundary(id) => graph.struct_entry(*id).map(|s| s.schema.name.clone()),
    }
}

impl GraphSummary {
    pub fn of(graph: &Graph) -> Self {
        let index: HashMap<NodeId, usize> = graph
            .nodes()
            .enumerate()
            .map(|(i, (id, _))| (id, i))
            .collect();

        let structs = graph
            .structs()
            .iter()
            .map(|s| DefinitionSummary {
                name: s.schema.name.clone(),
                inputs: s
                    .schema
                    .fields
                    .iter()
                    .map(|f| PortSummary {
                        name: f.name.clone(),
                        type_name: f.value_type.display_name(),
                    })
                    .collect(),
                outputs: Vec::new(),
                in_use: graph.struct_in_use(s.id),
            })
            .collect();

        let ports = |fields: &[blueprint_types::Field]| -> Vec<PortSummary> {
            fields
                .iter()
                .map(|f| PortSummary {
                    name: f.name.clone(),
                    type_name: f.value_type.display_name(),
                })
                .collect()
        };
        let functions = graph
            .functions()
            .iter()
            .map(|f| DefinitionSummary {
                name: f.def.name.clone(),
                inputs: ports(&f.def.inputs),
                outputs: ports(&f.def.outputs),
                in_use: graph.function_in_use(f.id),
            })
            .collect();

        let nodes = graph
            .nodes()
            .enumerate()
            .map(|(i, (_, node))| NodeSummary {
                index: i,
                kind: kind_name(node.kind()),
                id: node_key(graph, node.kind()).unwrap_or_default(),
                position: node.position,
                config: node.config().clone(),
                inputs: node
                    .inputs()
                    .iter()
                    .map(|input| InputSummary {
                        name: input.def.name.clone(),
                        type_name: input.def.value_type.display_name(),
                        inset: input.inset().cloned(),
                        wires: input
                            .wires()
                            .iter()
                            .filter_map(|w| {
                                Some(WireSummary {
                                    source: *index.get(&w.source.node)?,
                                    output: w.source.slot,
                                    relays: w.relays.clone(),
                                })
                            })
                            .collect(),
                    })
                    .collect(),
                outputs: node
                    .outputs()
                    .iter()
                    .map(|output| PortSummary {
                        name: output.def.name.clone(),
                        type_name: output.def.value_type.display_name(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            structs,
            functions,
            nodes,
        }
    }

    pub fn wire_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.inputs.iter())
            .map(|i| i.wires.len())
            .sum()
    }
}
