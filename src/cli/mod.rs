//! CLI argument definitions and error reporting.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "taskhive")]
#[command(about = "Agent task orchestration: priority queue, dependencies, bounded terminals")]
#[command(version)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a config file (defaults to .taskhive/config.yaml)
    #[arg(long, short, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a batch of tasks from a YAML taskfile to completion
    Run(commands::run::RunArgs),
    /// Inspect and validate configuration
    Config(commands::config::ConfigArgs),
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let payload = serde_json::json!({
            "error": err.to_string(),
            "chain": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|_| format!("{{\"error\": \"{err}\"}}"))
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
