//! CLI module for shardcursor
//!
//! Provides command-line interface for:
//! - search: Page through a query over a fixture index
//! - intermediate: Same, with intermediate facet buckets
//! - check-config: Validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    check_config, execute_intermediate, execute_search, intermediate, run, run_command, search,
};
pub use errors::{CliError, CliResult};
pub use io::{read_request, write_error, write_response};
