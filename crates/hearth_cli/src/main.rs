//! HearthDB CLI
//!
//! Support and debugging tools for HearthDB stores.
//!
//! # Commands
//!
//! - `inspect` - Display collections, logs and storage sizes
//! - `export` - Write a JSON snapshot
//! - `import` - Load a JSON snapshot (replace or merge)
//! - `reset` - Wipe the store
//! - `checkpoint` - Write a snapshot and clear the journal

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// HearthDB command-line store tools.
#[derive(Parser)]
#[command(name = "hearth")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display collections, logs and storage sizes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a JSON snapshot of every collection and log
    Export {
        /// Snapshot file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Load a JSON snapshot
    Import {
        /// Snapshot file to read
        #[arg(short, long)]
        input: PathBuf,

        /// Upsert into existing data instead of replacing it
        #[arg(short, long)]
        merge: bool,
    },

    /// Delete every collection and log
    Reset {
        /// Confirm the reset
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a snapshot and clear the journal
    Checkpoint,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Export { output } => {
            let path = cli.path.ok_or("Store path required for export")?;
            commands::snapshot::export(&path, &output)?;
        }
        Commands::Import { input, merge } => {
            let path = cli.path.ok_or("Store path required for import")?;
            commands::snapshot::import(&path, &input, merge)?;
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Store path required for reset")?;
            commands::maintenance::reset(&path, yes)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Store path required for checkpoint")?;
            commands::maintenance::checkpoint(&path)?;
        }
        Commands::Version => {
            println!("HearthDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("HearthDB Core v{}", hearth_core::VERSION);
        }
    }

    Ok(())
}
