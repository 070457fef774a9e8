//! Rivet - command-line build runner for `rivet.toml` projects

use std::process::ExitCode;

use clap::Parser;
use rivet::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli::run(cli)
}

/// Log to stderr, filtered by `RIVET_LOG` (default `warn`, `-v` for debug).
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("RIVET_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "rivet=debug" } else { "warn" }));

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}
