//! Events command for dumping the local `SQLite` store.
//!
//! Output is JSON Lines in the same shape `lt import` reads, so a dump can be
//! re-imported elsewhere.

use std::io::Write;

use anyhow::{Context, Result};

use lt_db::{Database, EventFilter};

use crate::Config;
use crate::commands::import::WireEvent;

/// Writes matching events as JSONL, in ingestion order.
pub fn run<W: Write>(writer: &mut W, config: &Config, filter: &EventFilter) -> Result<usize> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let events = db.list_events(filter)?;
    let count = events.len();

    for event in events {
        serde_json::to_writer(&mut *writer, &WireEvent::from(event))?;
        writeln!(writer)?;
    }

    Ok(count)
}
