//! Status command for showing what the store holds.

use std::io::Write;

use anyhow::{Context, Result};

use lt_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let stats = db.stats()?;

    writeln!(writer, "Learning time status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    if stats.events == 0 {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "Events: {} across {} session(s)",
        stats.events, stats.correlation_keys
    )?;
    writeln!(
        writer,
        "Ledger: {} session row(s), {} daily row(s)",
        stats.session_ledger_rows, stats.daily_ledger_rows
    )?;
    writeln!(writer, "Completed study plan items: {}", stats.completed_items)?;
    writeln!(writer, "LO completeness rows: {}", stats.completeness_rows)?;

    Ok(())
}
