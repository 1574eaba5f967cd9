//! Learning objective completeness.
//!
//! Derives, for every learning objective completed in a batch, when it was
//! first and last completed. Unlike learning time this ignores attempts: any
//! `completed` event carrying an LO ID counts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::EventBatch;
use crate::reconcile::sort_chronologically;
use crate::types::{LoId, SessionId, StudentId, StudyPlanItemId};

/// Completion summary for one learning objective within one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessRecord {
    pub student_id: StudentId,
    pub session_id: SessionId,
    pub lo_id: LoId,
    /// Study plan item named by the last completion, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_plan_item_id: Option<StudyPlanItemId>,
    pub first_completed_at: DateTime<Utc>,
    pub last_completed_at: DateTime<Utc>,
    pub completions: u32,
}

/// Derives completeness records for a batch, ordered by LO ID.
pub fn derive_completeness(batch: &EventBatch) -> Vec<CompletenessRecord> {
    let key = batch.key();
    let mut by_lo: BTreeMap<&LoId, CompletenessRecord> = BTreeMap::new();

    let completions = sort_chronologically(batch.events())
        .into_iter()
        .filter(|event| event.lifecycle.is_completed());

    for event in completions {
        let Some(lo_id) = event.lo_id.as_ref() else {
            continue;
        };

        by_lo
            .entry(lo_id)
            .and_modify(|record| {
                record.last_completed_at = event.timestamp;
                record.completions += 1;
                if event.study_plan_item_id.is_some() {
                    record.study_plan_item_id.clone_from(&event.study_plan_item_id);
                }
            })
            .or_insert_with(|| CompletenessRecord {
                student_id: key.student_id.clone(),
                session_id: key.session_id.clone(),
                lo_id: lo_id.clone(),
                study_plan_item_id: event.study_plan_item_id.clone(),
                first_completed_at: event.timestamp,
                last_completed_at: event.timestamp,
                completions: 1,
            });
    }

    by_lo.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LearningEvent;
    use crate::lifecycle::Lifecycle;
    use crate::types::{CorrelationKey, EventId};
    use chrono::{Duration, TimeZone};

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 20, 6, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn event(id: &str, lifecycle: Lifecycle, at: i64, lo: Option<&str>, spi: Option<&str>) -> LearningEvent {
        LearningEvent {
            id: EventId::new(id).unwrap(),
            key: CorrelationKey::new(
                StudentId::new("student-1").unwrap(),
                SessionId::new("session-1").unwrap(),
            ),
            timestamp: ts(at),
            lifecycle,
            lo_id: lo.map(|s| LoId::new(s).unwrap()),
            study_plan_item_id: spi.map(|s| StudyPlanItemId::new(s).unwrap()),
            time_spent: None,
        }
    }

    #[test]
    fn records_first_and_last_completion_per_lo() {
        let batch = EventBatch::new(vec![
            event("e3", Lifecycle::Completed, 50, Some("lo-b"), Some("spi-2")),
            event("e1", Lifecycle::Started, 0, Some("lo-b"), None),
            event("e2", Lifecycle::Completed, 30, Some("lo-b"), Some("spi-1")),
            event("e4", Lifecycle::Completed, 40, Some("lo-a"), None),
        ])
        .unwrap();

        let records = derive_completeness(&batch);
        assert_eq!(records.len(), 2);

        let lo_a = &records[0];
        assert_eq!(lo_a.lo_id.as_str(), "lo-a");
        assert_eq!(lo_a.completions, 1);
        assert_eq!(lo_a.first_completed_at, ts(40));
        assert!(lo_a.study_plan_item_id.is_none());

        let lo_b = &records[1];
        assert_eq!(lo_b.lo_id.as_str(), "lo-b");
        assert_eq!(lo_b.student_id.as_str(), "student-1");
        assert_eq!(lo_b.session_id.as_str(), "session-1");
        assert_eq!(lo_b.completions, 2);
        assert_eq!(lo_b.first_completed_at, ts(30));
        assert_eq!(lo_b.last_completed_at, ts(50));
        assert_eq!(
            lo_b.study_plan_item_id.as_ref().map(StudyPlanItemId::as_str),
            Some("spi-2")
        );
    }

    #[test]
    fn completions_without_lo_are_skipped() {
        let batch = EventBatch::new(vec![
            event("e1", Lifecycle::Started, 0, None, None),
            event("e2", Lifecycle::Completed, 10, None, Some("spi-1")),
        ])
        .unwrap();
        assert!(derive_completeness(&batch).is_empty());
    }

    #[test]
    fn abandoned_attempts_still_count_completions() {
        // Completeness does not care that the later attempt never completed.
        let batch = EventBatch::new(vec![
            event("e1", Lifecycle::Started, 0, Some("lo-a"), None),
            event("e2", Lifecycle::Completed, 10, Some("lo-a"), None),
            event("e3", Lifecycle::Started, 20, Some("lo-a"), None),
            event("e4", Lifecycle::Paused, 25, Some("lo-a"), None),
        ])
        .unwrap();
        let records = derive_completeness(&batch);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_completed_at, ts(10));
    }

    #[test]
    fn record_serializes_without_missing_item() {
        let batch = EventBatch::new(vec![event("e1", Lifecycle::Completed, 5, Some("lo-a"), None)])
            .unwrap();
        let json = serde_json::to_value(&derive_completeness(&batch)[0]).unwrap();
        assert_eq!(json["lo_id"], "lo-a");
        assert_eq!(json["completions"], 1);
        assert!(json.get("study_plan_item_id").is_none());
    }
}
