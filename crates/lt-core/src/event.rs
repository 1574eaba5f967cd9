//! Canonical learning session events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;
use crate::types::{CorrelationKey, EventId, LoId, StudyPlanItemId};

/// A lifecycle event decoded from a raw event log.
///
/// Immutable once normalized; reconciliation only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    /// Unique identifier for this event.
    pub id: EventId,
    /// The (student, session) pair this event belongs to.
    pub key: CorrelationKey,
    /// When the client recorded the event.
    pub timestamp: DateTime<Utc>,
    /// The lifecycle transition.
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lo_id: Option<LoId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_plan_item_id: Option<StudyPlanItemId>,
    /// Client-reported seconds spent, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<f64>,
}

/// An event suitable for reconciliation.
///
/// This trait allows reconciliation to work with different event
/// representations (e.g., [`LearningEvent`], or test fixtures).
pub trait TimedEvent {
    /// Returns the event's timestamp.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Returns the lifecycle transition the event records.
    fn lifecycle(&self) -> &Lifecycle;
}

impl TimedEvent for LearningEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

impl<T: TimedEvent + ?Sized> TimedEvent for &T {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }

    fn lifecycle(&self) -> &Lifecycle {
        (**self).lifecycle()
    }
}
