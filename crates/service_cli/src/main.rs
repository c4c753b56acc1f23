//! viewc - Command Line Operations for View Compilation
//!
//! This is the operational entry point for the view compiler.
//!
//! # Commands
//!
//! - `viewc compile --scenario <file>` - Compile the scenario's view and print the result
//! - `viewc check --scenario <file>` - Validate a scenario without building graphs
//!
//! # Architecture
//!
//! As the **S**ervice layer on top of `view_core`, `view_depgraph` and
//! `view_compiler`, this crate wires in-memory sources from a scenario file
//! into the compiler.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use view_compiler::config::{build_config, CliArgs as ConfigCliArgs};

mod commands;
mod error;
mod scenario;

pub use error::{CliError, Result};

/// View definition compiler CLI
#[derive(Parser)]
#[command(name = "viewc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compiler configuration file path (TOML format)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Graph build mode (sequential, parallel)
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Feed portfolio requirements one stripe at a time
    #[arg(long, global = true)]
    striped: bool,

    /// Worker pool size
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a scenario's view definition
    Compile {
        /// Path to scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Valuation time (RFC 3339); defaults to the scenario's, then now
        #[arg(short, long)]
        valuation_time: Option<String>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Validate a scenario file
    Check {
        /// Path to scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,
    },
}

impl From<&Cli> for ConfigCliArgs {
    fn from(cli: &Cli) -> Self {
        ConfigCliArgs {
            config_file: cli.config.clone(),
            graph_build_mode: cli.mode.clone(),
            striped: cli.striped.then_some(true),
            worker_threads: cli.threads,
            log_level: cli.log_level.clone(),
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&ConfigCliArgs::from(&cli)).context("invalid compiler configuration")?;

    init_tracing(config.log_level.as_filter_str());
    info!(
        mode = %config.graph_build_mode,
        striped = config.striped_portfolio_requirements,
        worker_threads = config.effective_worker_threads(),
        "viewc v{}",
        env!("CARGO_PKG_VERSION")
    );

    match cli.command {
        Commands::Compile {
            scenario,
            valuation_time,
            format,
        } => commands::compile::run(&scenario, valuation_time.as_deref(), &format, config)
            .with_context(|| format!("compiling {}", scenario.display())),
        Commands::Check { scenario } => commands::check::run(&scenario)
            .with_context(|| format!("checking {}", scenario.display())),
    }
}
