//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod eval;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::build::BuildContext;
use crate::config::{self, ConfigError, LoadedBuildFile};
use crate::error::BuildError;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Rivet - declarative build orchestration with parallel target scheduling
#[derive(Parser)]
#[command(name = "rivet")]
#[command(about = "Rivet - declarative build orchestration with parallel target scheduling")]
#[command(version)]
pub struct Cli {
    /// Verbose output (debug logging, every failure)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options selecting the build file and extra properties.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildFileArgs {
    /// Build file to use instead of searching for rivet.toml
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Define a read-only property (repeatable)
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    pub define: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build targets and their dependencies
    Build {
        /// Targets to build; `*` patterns allowed.
        /// If omitted: project.default, else every target
        targets: Vec<String>,

        #[command(flatten)]
        build_file: BuildFileArgs,

        /// Number of parallel jobs
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        jobs: Option<u16>,

        /// Do not print echo messages
        #[arg(short, long)]
        quiet: bool,

        /// Print the build result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List declared targets
    Targets {
        #[command(flatten)]
        build_file: BuildFileArgs,
    },

    /// Expand `${...}` expressions using the build's properties
    Eval {
        /// Text to expand, e.g. '${out}/bin'
        expression: String,

        #[command(flatten)]
        build_file: BuildFileArgs,
    },
}

/// Run the CLI application
pub fn run(cli: Cli) -> ExitCode {
    let verbose = cli.verbose;

    match cli.command {
        Commands::Build { targets, build_file, jobs, quiet, json } => {
            build::run_build(&build_file, targets, jobs.map(usize::from), quiet, json, verbose)
        }
        Commands::Targets { build_file } => build::run_targets(&build_file),
        Commands::Eval { expression, build_file } => eval::run_eval(&expression, &build_file, verbose),
    }
}

/// Load the build file, user defaults and `-D` definitions into a context.
///
/// With `allow_missing`, a missing build file yields an empty project rooted
/// at the working directory.
pub(crate) fn load_context(args: &BuildFileArgs, allow_missing: bool) -> Result<BuildContext, BuildError> {
    let definitions = args
        .define
        .iter()
        .map(|d| config::parse_definition(d))
        .collect::<Result<Vec<_>, _>>()?;

    let build_file = match config::load_build_file(args.file.as_deref()) {
        Ok(loaded) => loaded,
        Err(ConfigError::NotFound(dir)) if allow_missing => LoadedBuildFile::empty(dir),
        Err(e) => return Err(e.into()),
    };

    let user = config::load_user_config()?;
    Ok(BuildContext::new(build_file)?.with_user_config(&user)?.with_definitions(&definitions))
}

/// Exit code for an error raised before or outside a run.
pub(crate) fn exit_code_for(err: &BuildError) -> ExitCode {
    match err {
        BuildError::Config(_)
        | BuildError::UnknownTarget { .. }
        | BuildError::CircularDependency { .. }
        | BuildError::ReadOnlyProperty { .. } => ExitCode::from(EXIT_INVALID_ARGS),
        _ => ExitCode::from(EXIT_ERROR),
    }
}
