//! CLI commands module.

pub mod migrate;
