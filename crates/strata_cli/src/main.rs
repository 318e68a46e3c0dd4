//! Strata CLI
//!
//! Command-line tools for Strata database maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display collections, properties, indexes and figures
//! - `verify` - Check every segment's markers and structure
//! - `compact` - Run one compaction pass
//! - `dump` - List the markers of a collection in replay order

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Strata command-line database tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display collections, properties, indexes and figures
    Inspect {
        /// Path to the database directory
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify marker checksums and segment structure
    Verify {
        /// Path to the database directory
        path: PathBuf,
    },

    /// Run one compaction pass over every collection
    Compact {
        /// Path to the database directory
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List the markers of a collection in replay order
    Dump {
        /// Path to the database directory
        path: PathBuf,

        /// Collection name
        collection: String,

        /// Stop after this many markers
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { path, format } => commands::inspect::run(&path, format)?,
        Commands::Verify { path } => commands::verify::run(&path)?,
        Commands::Compact { path, format } => commands::compact::run(&path, format)?,
        Commands::Dump {
            path,
            collection,
            limit,
            format,
        } => commands::dump::run(&path, &collection, limit, format)?,
        Commands::Version => {
            println!("Strata CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Strata Core v{}", strata_core::VERSION);
        }
    }

    Ok(())
}
