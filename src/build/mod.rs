//! Build pipeline module for rivet
//!
//! Turns a loaded `rivet.toml` into a scheduled run of its targets.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Context**: project identity, layered properties and run options
//! - **Planning**: declared targets, requested-target selection and the
//!   dependency closure
//! - **Execution**: targets run on the [`crate::graph::ExecutionGraph`]
//!   worker pool, each after its dependencies succeeded
//!
//! # Example
//!
//! ```no_run
//! use rivet::build::{BuildContext, BuildPipeline};
//! use rivet::config::load_build_file;
//!
//! let build_file = load_build_file(None)?;
//! let context = BuildContext::new(build_file)?;
//! let pipeline = BuildPipeline::new(context);
//!
//! let result = pipeline.build()?;
//! println!("{}", result.summary());
//! # Ok::<(), rivet::error::BuildError>(())
//! ```

pub mod context;
pub mod pipeline;
pub mod result;
pub mod target;

pub use context::*;
pub use pipeline::*;
pub use result::*;
pub use target::*;
