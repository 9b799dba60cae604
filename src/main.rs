//! shardcursor CLI entry point
//!
//! Installs logging and dispatches to the CLI module. Failures become an
//! error frame on stdout plus a line on stderr, and a non-zero exit.

use shardcursor::cli;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    init_tracing();

    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), &e.to_string());
        eprintln!("{}: {}", e.code_str(), e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries response frames only.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
