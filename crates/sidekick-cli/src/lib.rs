//! CLI argument models for the `sidekick` binary.
//!
//! Exposes the clap-backed command tree plus the value enums that map flag
//! values onto provider and runtime types.

pub mod cli_args;
pub mod cli_types;

pub use cli_args::{Cli, CliCommand};
pub use cli_types::*;
