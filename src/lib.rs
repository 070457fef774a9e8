//! Rivet - declarative build orchestration
//!
//! This library provides functionality to:
//! - Load `rivet.toml` build files with targets, dependencies and properties
//! - Expand `${...}` property expressions with cycle detection
//! - Run target graphs on a worker pool, aggregating failures

pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod expression;
pub mod graph;
pub mod location;
pub mod properties;
