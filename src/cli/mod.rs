//! Command-line interface for the ingestion worker.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tenant-isolated document ingestion worker.
#[derive(Debug, Parser)]
#[command(name = "ingestd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'c', global = true, help = "Path to a config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the worker, reading ingestion events as JSON lines on stdin
    Run,

    /// Create the job store schema and the vector collection
    Migrate,

    /// Show a document's status and per-status job counts
    Status(commands::StatusArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
