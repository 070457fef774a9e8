//! Build file configuration
//!
//! Provides types and parsing for `rivet.toml` build files and the per-user
//! defaults file.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
