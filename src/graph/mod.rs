//! Dependency graph of targets and its parallel scheduler.

mod execution;
mod node;

pub use execution::{default_jobs, ExecutionGraph, RunStats};
pub use node::{ExecutionNode, NodeId};
