//! Per-correlation-key event batches.

use std::collections::HashMap;

use thiserror::Error;

use crate::event::LearningEvent;
use crate::reconcile::{ReconciliationResult, reconcile, sort_chronologically};
use crate::types::{CorrelationKey, StudyPlanItemId};

/// Errors building an [`EventBatch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("event batch is empty")]
    Empty,

    /// Events from more than one (student, session) pair.
    #[error("event batch mixes correlation keys {expected} and {found}")]
    MixedKeys {
        expected: CorrelationKey,
        found: CorrelationKey,
    },
}

/// The complete event window for one correlation key.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    key: CorrelationKey,
    events: Vec<LearningEvent>,
}

impl EventBatch {
    /// Builds a batch, checking every event shares the first event's key.
    pub fn new(events: Vec<LearningEvent>) -> Result<Self, BatchError> {
        let key = events.first().ok_or(BatchError::Empty)?.key.clone();
        if let Some(stray) = events.iter().find(|event| event.key != key) {
            return Err(BatchError::MixedKeys {
                expected: key,
                found: stray.key.clone(),
            });
        }
        Ok(Self { key, events })
    }

    pub const fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Events in ingestion order.
    pub fn events(&self) -> &[LearningEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Reconciles the batch into a learning time and completion timestamp.
    pub fn reconcile(&self) -> ReconciliationResult {
        reconcile(&self.events)
    }

    /// The study plan item the session completes.
    ///
    /// Taken from the chronologically last `completed` event that names one.
    pub fn completed_study_plan_item(&self) -> Option<&StudyPlanItemId> {
        sort_chronologically(&self.events)
            .into_iter()
            .rev()
            .filter(|event| event.lifecycle.is_completed())
            .find_map(|event| event.study_plan_item_id.as_ref())
    }
}

/// Groups events into one batch per correlation key.
///
/// Batches are returned in order of each key's first appearance; events keep
/// their relative input order within a batch.
pub fn partition_by_key(events: Vec<LearningEvent>) -> Vec<EventBatch> {
    let mut index: HashMap<CorrelationKey, usize> = HashMap::new();
    let mut batches: Vec<EventBatch> = Vec::new();

    for event in events {
        if let Some(&slot) = index.get(&event.key) {
            batches[slot].events.push(event);
        } else {
            index.insert(event.key.clone(), batches.len());
            batches.push(EventBatch {
                key: event.key.clone(),
                events: vec![event],
            });
        }
    }

    batches
}
