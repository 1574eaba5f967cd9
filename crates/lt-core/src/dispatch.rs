//! Concurrent dispatch of one event batch to its downstream sinks.
//!
//! Two branches run in parallel over the same read-only batch:
//!
//! - `learning_time`: reconcile, upsert the learning time ledger, then mark
//!   the study plan item complete when the session completed
//! - `lo_completeness`: derive and record per-LO completeness
//!
//! Both always run to completion. This is a best-effort dual write: one
//! branch failing does not roll back the other.

use std::error::Error;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::batch::EventBatch;
use crate::completeness::{CompletenessRecord, derive_completeness};
use crate::fanout::{FanOutError, Task, fan_out};
use crate::reconcile::ReconciliationResult;
use crate::types::{CorrelationKey, StudentId, StudyPlanItemId};

/// Branch label for the learning time ledger write.
pub const LEARNING_TIME_BRANCH: &str = "learning_time";

/// Branch label for the completeness write.
pub const LO_COMPLETENESS_BRANCH: &str = "lo_completeness";

/// A downstream write failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Joined failure of one or both branches.
pub type DispatchError = FanOutError<SinkError>;

/// Stores per-session learning time, rolled up per student and day.
pub trait LearningTimeLedger: Sync {
    fn upsert_learning_time(
        &self,
        key: &CorrelationKey,
        result: &ReconciliationResult,
    ) -> Result<(), SinkError>;
}

/// Tracks study plan item completion.
pub trait StudyPlanItemTracker: Sync {
    fn mark_completed(
        &self,
        student_id: &StudentId,
        study_plan_item_id: &StudyPlanItemId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SinkError>;
}

/// Stores LO completeness records.
pub trait CompletenessRecorder: Sync {
    /// Upserts the records, returning how many were written.
    fn record_completeness(&self, records: &[CompletenessRecord]) -> Result<usize, SinkError>;
}

/// The sinks a dispatch writes to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub ledger: &'a dyn LearningTimeLedger,
    pub tracker: &'a dyn StudyPlanItemTracker,
    pub completeness: &'a dyn CompletenessRecorder,
}

/// What a successful dispatch wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub result: ReconciliationResult,
    pub completeness_records: usize,
}

enum BranchOutput {
    LearningTime(ReconciliationResult),
    Completeness(usize),
}

/// Runs both branches for `batch` and joins them.
pub fn dispatch_batch(
    batch: &EventBatch,
    collaborators: Collaborators<'_>,
) -> Result<DispatchOutcome, DispatchError> {
    let tasks = vec![
        Task::new(LEARNING_TIME_BRANCH, move || {
            learning_time_branch(batch, collaborators).map(BranchOutput::LearningTime)
        }),
        Task::new(LO_COMPLETENESS_BRANCH, move || {
            completeness_branch(batch, collaborators).map(BranchOutput::Completeness)
        }),
    ];

    let outputs = fan_out(tasks).inspect_err(|err| {
        tracing::warn!(key = %batch.key(), error = %err, "dispatch failed");
    })?;

    let mut outcome = DispatchOutcome {
        result: ReconciliationResult::default(),
        completeness_records: 0,
    };
    for output in outputs {
        match output {
            BranchOutput::LearningTime(result) => outcome.result = result,
            BranchOutput::Completeness(written) => outcome.completeness_records = written,
        }
    }

    tracing::debug!(
        key = %batch.key(),
        learning_time_ms = outcome.result.learning_time_ms(),
        completeness_records = outcome.completeness_records,
        "dispatched batch"
    );
    Ok(outcome)
}

fn learning_time_branch(
    batch: &EventBatch,
    collaborators: Collaborators<'_>,
) -> Result<ReconciliationResult, SinkError> {
    let result = batch.reconcile();
    collaborators.ledger.upsert_learning_time(batch.key(), &result)?;

    if let Some(completed_at) = result.completed_at {
        match batch.completed_study_plan_item() {
            Some(item) => {
                collaborators
                    .tracker
                    .mark_completed(&batch.key().student_id, item, completed_at)?;
            }
            None => tracing::debug!(key = %batch.key(), "completed without a study plan item"),
        }
    }

    Ok(result)
}

fn completeness_branch(
    batch: &EventBatch,
    collaborators: Collaborators<'_>,
) -> Result<usize, SinkError> {
    let records = derive_completeness(batch);
    if records.is_empty() {
        return Ok(0);
    }
    collaborators.completeness.record_completeness(&records)
}
