//! CLI argument definitions using clap
//!
//! Commands:
//! - shardcursor search --fixture <path> [--config <path>] [--byte-budget N]
//! - shardcursor intermediate --fixture <path> [--config <path>] [--byte-budget N]
//! - shardcursor check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// shardcursor - paged search over partitioned indexes
#[derive(Parser, Debug)]
#[command(name = "shardcursor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the query read from stdin and print every page, then the facet summary
    Search {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Index fixture with partitions and documents
        #[arg(long)]
        fixture: PathBuf,

        /// Page byte budget (defaults to the configured budget)
        #[arg(long)]
        byte_budget: Option<u64>,
    },

    /// Like search, but print intermediate facet buckets instead of a summary
    Intermediate {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Index fixture with partitions and documents
        #[arg(long)]
        fixture: PathBuf,

        /// Page byte budget (defaults to the configured budget)
        #[arg(long)]
        byte_budget: Option<u64>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
