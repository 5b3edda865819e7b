//! Command implementations
//!
//! Each command returns `anyhow::Result` with context naming the file it was
//! working on; the library errors underneath carry the detail.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use blueprint_runtime::persistence::{self, LoadReport};
use blueprint_runtime::{EvaluatorOptions, ExecutionTrigger, GraphSummary, NodeRegistry, ScriptHost};

use crate::config::Settings;
use crate::demo;

/// Options for `wiregraph run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub graph: Option<PathBuf>,
    /// Glob over event names
    pub event: String,
    pub player: Option<String>,
    pub text: Option<String>,
    pub number: Option<f64>,
    pub repeat: usize,
}

fn graph_path(settings: &Settings, explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit.or_else(|| settings.graph.clone()) {
        Some(path) => Ok(path),
        None => bail!("No graph given and no `graph` configured"),
    }
}

fn load(path: &Path, registry: &NodeRegistry) -> Result<LoadReport> {
    persistence::load_from_path(path, registry)
        .with_context(|| format!("Failed to load graph {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

pub async fn run(settings: &Settings, options: RunOptions) -> Result<()> {
    let path = graph_path(settings, options.graph)?;
    let registry = Arc::new(NodeRegistry::with_builtins());
    let host = Arc::new(
        ScriptHost::new(registry).with_options(EvaluatorOptions {
            max_call_depth: settings.max_call_depth,
        }),
    );
    let outcome = host
        .load(&path)
        .with_context(|| format!("Failed to load graph {}", path.display()))?;
    if outcome.dropped_nodes > 0 || outcome.dropped_wires > 0 {
        warn!(
            dropped_nodes = outcome.dropped_nodes,
            dropped_wires = outcome.dropped_wires,
            "Graph loaded with unresolved parts"
        );
    }

    let trigger = ExecutionTrigger {
        event: options.event.clone(),
        player: options.player,
        text: options.text,
        number: options.number,
    };

    let permits = Arc::new(Semaphore::new(settings.workers.max(1)));
    let mut tasks = JoinSet::new();
    for _ in 0..options.repeat {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let host = Arc::clone(&host);
        let pattern = options.event.clone();
        let trigger = trigger.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            host.fire_matching(&pattern, trigger)
        });
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        for result in joined? {
            match result {
                Ok(result) => {
                    for message in &result.messages {
                        match &message.to {
                            Some(to) => println!("[{}] -> {}: {}", result.event, to, message.text),
                            None => println!("[{}] {}", result.event, message.text),
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    println!("error: {}", e);
                }
            }
        }
    }

    let stats = host.stats();
    if stats.is_empty() {
        println!("No event matched '{}'", options.event);
    }
    for (event, stats) in stats {
        println!(
            "{}: {} invocations, {} failed, {} steps",
            event, stats.invocations, stats.failures, stats.steps
        );
    }
    info!(failures, "Run finished");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// inspect
// ─────────────────────────────────────────────────────────────────────────────

pub fn inspect(settings: &Settings, graph: Option<PathBuf>, json: bool) -> Result<()> {
    let path = graph_path(settings, graph)?;
    let registry = NodeRegistry::with_builtins();
    let report = load(&path, &registry)?;
    let summary = GraphSummary::of(&report.graph);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} (format v{}, {} nodes, {} wires)",
        path.display(),
        report.version,
        summary.nodes.len(),
        summary.wire_count()
    );
    if report.dropped_nodes > 0 || report.dropped_wires > 0 {
        println!(
            "  dropped {} unresolved nodes and {} wires",
            report.dropped_nodes, report.dropped_wires
        );
    }

    let ports = |ports: &[blueprint_runtime::PortSummary]| {
        ports
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    if !summary.structs.is_empty() {
        println!("structs:");
        for s in &summary.structs {
            let used = if s.in_use { "" } else { " (unused)" };
            println!("  {} {{ {} }}{}", s.name, ports(&s.inputs), used);
        }
    }
    if !summary.functions.is_empty() {
        println!("functions:");
        for f in &summary.functions {
            let used = if f.in_use { "" } else { " (unused)" };
            println!("  {}({}) -> ({}){}", f.name, ports(&f.inputs), ports(&f.outputs), used);
        }
    }

    println!("nodes:");
    for node in &summary.nodes {
        let config = if node.config.is_null() {
            String::new()
        } else {
            format!(" {}", node.config)
        };
        println!(
            "  #{} {} {}{} @ ({}, {})",
            node.index, node.kind, node.id, config, node.position.x, node.position.y
        );
        for input in &node.inputs {
            if let Some(inset) = &input.inset {
                println!("      {} = {}", input.name, inset);
            }
            for wire in &input.wires {
                let relays = if wire.relays.is_empty() {
                    String::new()
                } else {
                    format!(" via {} relays", wire.relays.len())
                };
                println!(
                    "      {} <- #{}.{}{}",
                    input.name, wire.source, wire.output, relays
                );
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// nodes
// ─────────────────────────────────────────────────────────────────────────────

pub fn list_nodes() -> Result<()> {
    for line in catalog(&NodeRegistry::with_builtins()) {
        println!("{}", line);
    }
    Ok(())
}

/// Built-in node types grouped under their category
fn catalog(registry: &NodeRegistry) -> Vec<String> {
    let mut lines = Vec::new();
    for category in registry.categories() {
        lines.push(format!("{}:", category));
        for def in registry.nodes_in_category(category) {
            let pure = if def.pure { " (pure)" } else { "" };
            match &def.description {
                Some(description) => lines.push(format!("  {}{} - {}", def.id, pure, description)),
                None => lines.push(format!("  {}{}", def.id, pure)),
            }
        }
    }
    lines
}

// ─────────────────────────────────────────────────────────────────────────────
// upgrade
// ─────────────────────────────────────────────────────────────────────────────

pub fn upgrade(settings: &Settings, graph: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let path = graph_path(settings, graph)?;
    let registry = NodeRegistry::with_builtins();
    let report = load(&path, &registry)?;
    let target = output.unwrap_or_else(|| path.clone());

    if target == path && settings.backup_on_upgrade {
        let backup = backup_path(&path, report.version);
        std::fs::copy(&path, &backup)
            .with_context(|| format!("Failed to back up {} to {}", path.display(), backup.display()))?;
        info!(backup = %backup.display(), "Backed up original graph");
    }

    persistence::save_to_path(&report.graph, &registry, &target)
        .with_context(|| format!("Failed to save graph {}", target.display()))?;
    println!(
        "Upgraded {} from v{} to v{}",
        target.display(),
        report.version,
        persistence::CURRENT_VERSION
    );
    Ok(())
}

fn backup_path(path: &Path, version: i32) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".v{}.bak", version));
    path.with_file_name(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// demo / config
// ─────────────────────────────────────────────────────────────────────────────

pub fn write_demo(output: &Path) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let graph = demo::build(&registry)?;
    persistence::save_to_path(&graph, &registry, output)
        .with_context(|| format!("Failed to write demo graph {}", output.display()))?;
    println!("Wrote demo graph to {}", output.display());
    println!("Try: wiregraph run {} --event 'square' --number 12", output.display());
    Ok(())
}

pub fn print_config(settings: &Settings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}
