//! Lockstep CLI
//!
//! Command-line tools for Lockstep.
//!
//! # Commands
//!
//! - `simulate` - Run a window scenario against a simulated clock
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lockstep transaction scheduling tools.
#[derive(Parser)]
#[command(name = "lockstep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario of window resizes and report each transaction
    Simulate {
        /// Scenario file (JSON); a built-in scenario is used if omitted
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Override the commit timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            scenario,
            timeout_ms,
            format,
        } => {
            commands::simulate::run(scenario.as_deref(), timeout_ms, &format)?;
        }
        Commands::Version => {
            println!("Lockstep CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Lockstep Core v{}", lockstep_core::VERSION);
        }
    }

    Ok(())
}
