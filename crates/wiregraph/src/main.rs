//! Wiregraph CLI
//!
//! Loads blueprint graphs and fires events at them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wiregraph::commands::{self, RunOptions};
use wiregraph::config::{LogFormat, Settings};

/// Visual script runner
#[derive(Parser, Debug)]
#[command(name = "wiregraph")]
#[command(about = "Run, inspect and upgrade blueprint graphs", long_about = None)]
struct Args {
    /// Settings file (defaults to ./wiregraph.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fire events at a graph
    Run {
        /// Graph file (falls back to the configured graph)
        graph: Option<PathBuf>,

        /// Event name or glob pattern
        #[arg(short, long)]
        event: String,

        #[arg(long)]
        player: Option<String>,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        number: Option<f64>,

        /// Number of times to fire, spread over the configured workers
        #[arg(long, default_value = "1")]
        repeat: usize,
    },

    /// Print definitions, nodes and wires
    Inspect {
        graph: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a graph in the current file format
    Upgrade {
        graph: Option<PathBuf>,

        /// Write here instead of replacing the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the built-in node types
    Nodes,

    /// Write a sample graph
    Demo { output: PathBuf },

    /// Print the effective settings
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
    debug!(?settings, "Loaded settings");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(settings.workers.max(1))
        .build()
        .context("Failed to start runtime")?
        .block_on(async_main(args.command, settings))
}

async fn async_main(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Run {
            graph,
            event,
            player,
            text,
            number,
            repeat,
        } => {
            commands::run(
                &settings,
                RunOptions {
                    graph,
                    event,
                    player,
                    text,
                    number,
                    repeat,
                },
            )
            .await
        }
        Command::Inspect { graph, json } => commands::inspect(&settings, graph, json),
        Command::Upgrade { graph, output } => commands::upgrade(&settings, graph, output),
        Command::Nodes => commands::list_nodes(),
        Command::Demo { output } => commands::write_demo(&output),
        Command::Config => commands::print_config(&settings),
    }
}
