//! Command line interface module
//!
//! Argument parsing and the runner that wires the replication engine for
//! one-shot use from a terminal.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
