//! Report command for a student's daily learning time.
//!
//! Days are UTC calendar days, matching how the ledger buckets completions.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use lt_db::{DailyLearningTime, Database};

use crate::Config;
use crate::commands::util::{format_duration, parse_datetime};

/// Computed report data.
#[derive(Debug, Serialize)]
pub struct ReportData {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDate>,
    pub total_ms: i64,
    pub finished_learning_objectives: i64,
    pub completed_study_plan_items: usize,
    pub days: Vec<DailyLearningTime>,
}

pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    student_id: &str,
    since: Option<&str>,
    until: Option<&str>,
    json: bool,
) -> Result<()> {
    let since = since
        .map(parse_datetime)
        .transpose()
        .context("invalid --since")?
        .map(|dt| dt.date_naive());
    let until = until
        .map(parse_datetime)
        .transpose()
        .context("invalid --until")?
        .map(end_day);

    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let data = build_report(&db, student_id, since, until)?;

    if json {
        serde_json::to_writer_pretty(&mut *writer, &data)?;
        writeln!(writer)?;
    } else {
        write!(writer, "{}", format_report(&data))?;
    }
    Ok(())
}

/// First day excluded by a report ending at `until`.
fn end_day(until: DateTime<Utc>) -> NaiveDate {
    let day = until.date_naive();
    if until.time() == NaiveTime::MIN {
        day
    } else {
        day.succ_opt().unwrap_or(day)
    }
}

fn build_report(
    db: &Database,
    student_id: &str,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> Result<ReportData> {
    let days = db
        .daily_learning_time(student_id, since, until)
        .context("failed to load daily learning time")?;
    Ok(ReportData {
        student_id: student_id.to_string(),
        since,
        until,
        total_ms: days.iter().map(|day| day.learning_time_ms).sum(),
        finished_learning_objectives: db.finished_lo_count(student_id)?,
        completed_study_plan_items: db.completed_study_plan_items(student_id)?.len(),
        days,
    })
}

fn format_report(data: &ReportData) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Learning time for {}", data.student_id);

    if data.days.is_empty() {
        let _ = writeln!(out, "No learning time recorded.");
        return out;
    }

    for day in &data.days {
        let _ = writeln!(
            out,
            "{}  {:>7}  ({} session{})",
            day.day,
            format_duration(day.learning_time_ms),
            day.sessions.len(),
            if day.sessions.len() == 1 { "" } else { "s" },
        );
    }
    let _ = writeln!(out, "Total: {}", format_duration(data.total_ms));
    let _ = writeln!(
        out,
        "Learning objectives finished: {}",
        data.finished_learning_objectives
    );
    let _ = writeln!(
        out,
        "Study plan items completed: {}",
        data.completed_study_plan_items
    );
    out
}
