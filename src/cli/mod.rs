//! Command line interface
//!
//! Argument parsing and the runner that maps each subcommand onto the
//! adapter registry and the transfer orchestrator.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
