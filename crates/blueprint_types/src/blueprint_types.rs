//! Blueprint Types - Core type definitions for the visual scripting system
//!
//! This crate contains the pure data structures shared by the graph, the
//! evaluator and the persistence layer:
//!
//! - [`ValueType`]: closed set of type descriptors (primitives, lists, structs, signal)
//! - [`Value`]: runtime values flowing through value ports
//! - [`PortDef`] / [`NodePorts`]: port declarations
//! - [`codec`]: bounds-checked binary reader/writer used by the file format

pub mod codec;
mod error;
mod types;
mod value;

pub use error::*;
pub use types::*;
pub use value::*;
