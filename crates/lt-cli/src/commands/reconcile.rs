//! Reconcile command: turns stored event logs into ledger writes.
//!
//! Events are loaded, normalized and partitioned by (student, session). Each
//! session is then dispatched to the learning time and completeness sinks,
//! one session at a time. The two sinks use separate connections so their
//! branches write in parallel.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;

use lt_core::{
    Collaborators, EventBatch, ReconciliationResult, dispatch_batch, normalize_batch,
    partition_by_key,
};
use lt_db::{Database, EventFilter, SharedDatabase};

use crate::Config;
use crate::commands::util::format_duration;

/// Options for one reconcile run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub student: Option<String>,
    pub session: Option<String>,
    pub dry_run: bool,
    pub json: bool,
}

/// Counts for one reconcile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub sessions: usize,
    pub failed: usize,
    pub malformed: usize,
    pub ignored: usize,
}

#[derive(Debug, Serialize)]
struct SessionLine<'a> {
    student_id: &'a str,
    session_id: &'a str,
    learning_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completeness_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> SessionLine<'a> {
    fn new(batch: &'a EventBatch, result: &ReconciliationResult) -> Self {
        Self {
            student_id: batch.key().student_id.as_str(),
            session_id: batch.key().session_id.as_str(),
            learning_time_ms: result.learning_time_ms(),
            completed_at: result
                .completed_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            completeness_records: None,
            error: None,
        }
    }

    fn failed(batch: &'a EventBatch, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(batch, &ReconciliationResult::default())
        }
    }

    fn write_human<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let key = format!("{}/{}", self.student_id, self.session_id);
        if let Some(error) = &self.error {
            return writeln!(writer, "{key}: failed: {error}");
        }
        let duration = format_duration(self.learning_time_ms);
        match (&self.completed_at, self.completeness_records) {
            (Some(at), Some(records)) => writeln!(
                writer,
                "{key}: {duration}, completed {at}, {records} LO record(s)"
            ),
            (Some(at), None) => writeln!(writer, "{key}: {duration}, completed {at}"),
            (None, _) => writeln!(writer, "{key}: {duration}, not completed"),
        }
    }
}

/// Reconciles every stored session matching `options`.
///
/// Sessions that fail to write are reported and counted; the run continues
/// with the remaining sessions.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    options: &ReconcileOptions,
) -> Result<ReconcileSummary> {
    let open = || {
        Database::open(&config.database_path)
            .with_context(|| format!("failed to open {}", config.database_path.display()))
    };
    let ledger = SharedDatabase::new(open()?);

    let filter = EventFilter {
        student_id: options.student.clone(),
        session_id: options.session.clone(),
    };
    let records = ledger
        .lock()?
        .list_events(&filter)
        .context("failed to load events")?;

    let normalized = normalize_batch(&records);
    let batches = partition_by_key(normalized.events);
    tracing::info!(
        events = records.len(),
        sessions = batches.len(),
        malformed = normalized.malformed,
        ignored = normalized.ignored,
        "loaded events"
    );

    let mut summary = ReconcileSummary {
        sessions: batches.len(),
        malformed: normalized.malformed,
        ignored: normalized.ignored,
        ..ReconcileSummary::default()
    };

    let completeness = if options.dry_run {
        None
    } else {
        Some(SharedDatabase::new(open()?))
    };

    for batch in &batches {
        let line = match &completeness {
            None => SessionLine::new(batch, &batch.reconcile()),
            Some(completeness) => {
                let collaborators = Collaborators {
                    ledger: &ledger,
                    tracker: &ledger,
                    completeness,
                };
                match dispatch_batch(batch, collaborators) {
                    Ok(outcome) => SessionLine {
                        completeness_records: Some(outcome.completeness_records),
                        ..SessionLine::new(batch, &outcome.result)
                    },
                    Err(err) => {
                        tracing::error!(key = %batch.key(), error = %err, "reconciliation failed");
                        summary.failed += 1;
                        SessionLine::failed(batch, err.to_string())
                    }
                }
            }
        };

        if options.json {
            serde_json::to_writer(&mut *writer, &line)?;
            writeln!(writer)?;
        } else {
            line.write_human(writer)?;
        }
    }

    Ok(summary)
}
