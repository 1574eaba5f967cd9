//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Learning session time reconciliation.
///
/// Stores raw learning objective event logs and reconciles them into
/// per-session learning time, daily totals and completion records.
#[derive(Debug, Parser)]
#[command(name = "lt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import raw event logs as JSON Lines from stdin.
    Import,

    /// Reconcile stored events into learning time and completion records.
    Reconcile {
        /// Only reconcile this student's sessions.
        #[arg(long)]
        student: Option<String>,

        /// Only reconcile this session.
        #[arg(long)]
        session: Option<String>,

        /// Compute learning time without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Output one JSON object per session.
        #[arg(long)]
        json: bool,
    },

    /// Show a student's daily learning time.
    Report {
        /// Student to report on.
        #[arg(long)]
        student: String,

        /// Include days from this time (ISO 8601, date, or relative like "7 days ago").
        #[arg(long)]
        since: Option<String>,

        /// Include days before this time (ISO 8601, date, or relative).
        #[arg(long)]
        until: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show database status.
    Status,

    /// Dump stored events as JSON Lines.
    Events {
        /// Only events from this student.
        #[arg(long)]
        student: Option<String>,

        /// Only events from this session.
        #[arg(long)]
        session: Option<String>,
    },
}
