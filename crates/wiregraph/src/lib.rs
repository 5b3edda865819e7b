//! Wiregraph
//!
//! Command-line host for blueprint graphs: settings, logging setup and the
//! load/run/inspect/upgrade/demo commands.

pub mod commands;
pub mod config;
pub mod demo;
