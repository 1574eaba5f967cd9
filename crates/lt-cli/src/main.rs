use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lt_cli::commands::{events, import, reconcile, report, status};
use lt_cli::{Cli, Commands, Config};
use lt_db::EventFilter;

/// Load config, ensuring the database's parent directory exists.
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Import => {
            let summary = import::run(io::stdin().lock(), &config)?;
            eprintln!(
                "Imported {} new events ({} read)",
                summary.inserted, summary.read
            );
        }
        Commands::Reconcile {
            student,
            session,
            dry_run,
            json,
        } => {
            let options = reconcile::ReconcileOptions {
                student: student.clone(),
                session: session.clone(),
                dry_run: *dry_run,
                json: *json,
            };
            let summary = reconcile::run(&mut stdout, &config, &options)?;
            eprintln!(
                "Reconciled {} session(s); skipped {} malformed and {} ignored event(s)",
                summary.sessions, summary.malformed, summary.ignored
            );
            if summary.failed > 0 {
                anyhow::bail!(
                    "{} of {} session(s) failed to reconcile",
                    summary.failed,
                    summary.sessions
                );
            }
        }
        Commands::Report {
            student,
            since,
            until,
            json,
        } => {
            report::run(
                &mut stdout,
                &config,
                student,
                since.as_deref(),
                until.as_deref(),
                *json,
            )?;
        }
        Commands::Status => status::run(&mut stdout, &config)?,
        Commands::Events { student, session } => {
            let filter = EventFilter {
                student_id: student.clone(),
                session_id: session.clone(),
            };
            events::run(&mut stdout, &config, &filter)?;
        }
    }

    Ok(())
}
