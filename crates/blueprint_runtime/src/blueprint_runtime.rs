//! Blueprint Runtime - Graph model, compiler and evaluator for visual scripts
//!
//! A [`Graph`] holds typed nodes and the wires between them. The [`Compiler`]
//! turns the event nodes of a graph into entry points, and the [`Evaluator`]
//! runs an entry point against a fresh [`ExecutionContext`]: signals are pushed
//! from node to node, values are pulled on demand. [`ScriptHost`] ties a graph,
//! its program and the mutation lock together, and [`persistence`] reads and
//! writes the versioned binary file format.

pub use blueprint_types;

mod compiler;
mod definitions;
mod error;
mod evaluator;
mod graph;
mod host;
mod node;
mod nodes;
pub mod persistence;
mod registry;
mod summary;

pub use compiler::*;
pub use definitions::*;
pub use error::*;
pub use evaluator::*;
pub use graph::*;
pub use host::*;
pub use node::*;
pub use nodes::register_builtin_nodes;
pub use registry::*;
pub use summary::*;
