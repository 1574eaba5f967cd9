//! Learning time CLI library.
//!
//! This crate provides the CLI interface for learning time reconciliation.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
