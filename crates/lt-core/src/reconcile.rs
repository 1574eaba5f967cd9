//! Learning time reconciliation.
//!
//! Turns the lifecycle events of one correlation key into a single learning
//! time and completion timestamp.
//!
//! # Algorithm Summary
//!
//! 1. Stably sort events by timestamp (references only; input untouched)
//! 2. Split the sorted events into attempts, one per `started` boundary
//! 3. For each attempt with a `completed` event, measure from its first event
//!    to its last completion and subtract adjacent paused/resumed gaps
//! 4. Sum committed attempts; the last committed attempt supplies the
//!    completion timestamp
//!
//! Attempts without a completion are abandoned and contribute nothing.

use std::ops::Range;

use chrono::{DateTime, TimeDelta, Utc};

use crate::event::TimedEvent;

/// Outcome of reconciling one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Net active learning time, never negative.
    pub learning_time: TimeDelta,

    /// Last completion of the chronologically last committed attempt.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReconciliationResult {
    /// Learning time in whole milliseconds.
    pub fn learning_time_ms(&self) -> i64 {
        self.learning_time.num_milliseconds()
    }

    /// Whether any attempt was committed.
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

impl Default for ReconciliationResult {
    fn default() -> Self {
        Self {
            learning_time: TimeDelta::zero(),
            completed_at: None,
        }
    }
}

/// A contiguous run of sorted events beginning at a `started` event, or at
/// the start of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Indices into the sorted events.
    pub range: Range<usize>,
}

impl Attempt {
    /// The attempt's events within `sorted`.
    pub fn events<'s, E>(&self, sorted: &'s [E]) -> &'s [E] {
        &sorted[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// What an attempt contributes to the batch total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// No `completed` event; contributes nothing.
    Abandoned,
    /// Counted towards the total.
    Committed {
        net: TimeDelta,
        completed_at: DateTime<Utc>,
    },
}

/// Returns references to `events` in ascending timestamp order.
///
/// The sort is stable: events sharing a timestamp keep their input order.
pub fn sort_chronologically<E: TimedEvent>(events: &[E]) -> Vec<&E> {
    let mut sorted: Vec<&E> = events.iter().collect();
    sorted.sort_by_key(|event| event.timestamp());
    sorted
}

/// Splits sorted events into attempts.
///
/// Every `started` event opens a new attempt. The first attempt begins at
/// index 0 whatever that event is. The attempts cover the input with no gaps.
pub fn segment_attempts<E: TimedEvent>(sorted: &[E]) -> Vec<Attempt> {
    let mut attempts = Vec::new();
    let mut start = 0;

    for (index, event) in sorted.iter().enumerate().skip(1) {
        if event.lifecycle().is_started() {
            attempts.push(Attempt {
                range: start..index,
            });
            start = index;
        }
    }

    if !sorted.is_empty() {
        attempts.push(Attempt {
            range: start..sorted.len(),
        });
    }

    attempts
}

/// Resolves one attempt's events, which must be sorted.
pub fn resolve_attempt<E: TimedEvent>(events: &[E]) -> AttemptOutcome {
    let Some(last) = events
        .iter()
        .rposition(|event| event.lifecycle().is_completed())
    else {
        return AttemptOutcome::Abandoned;
    };

    let anchor = events[0].timestamp();
    let completed_at = events[last].timestamp();
    let elapsed = completed_at - anchor;
    let net = (elapsed - paused_gaps(&events[..=last])).max(TimeDelta::zero());

    AttemptOutcome::Committed { net, completed_at }
}

/// Total time between each `paused` event and a `resumed` event directly
/// after it. A pause followed by anything else is not a gap.
pub fn paused_gaps<E: TimedEvent>(events: &[E]) -> TimeDelta {
    events
        .windows(2)
        .filter(|pair| pair[0].lifecycle().is_paused() && pair[1].lifecycle().is_resumed())
        .fold(TimeDelta::zero(), |total, pair| {
            total + (pair[1].timestamp() - pair[0].timestamp())
        })
}

/// Sums the committed attempts of `sorted`.
pub fn aggregate<E: TimedEvent>(sorted: &[E], attempts: &[Attempt]) -> ReconciliationResult {
    attempts
        .iter()
        .map(|attempt| resolve_attempt(attempt.events(sorted)))
        .fold(ReconciliationResult::default(), |mut result, outcome| {
            if let AttemptOutcome::Committed { net, completed_at } = outcome {
                result.learning_time = result.learning_time + net;
                result.completed_at = Some(completed_at);
            }
            result
        })
}

/// Reconciles the events of one correlation key, in any order.
pub fn reconcile<E: TimedEvent>(events: &[E]) -> ReconciliationResult {
    let sorted = sort_chronologically(events);
    let attempts = segment_attempts(&sorted);
    let result = aggregate(&sorted, &attempts);

    tracing::debug!(
        events = events.len(),
        attempts = attempts.len(),
        learning_time_ms = result.learning_time_ms(),
        completed = result.is_completed(),
        "reconciled batch"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use chrono::{Duration, TimeZone};

    /// Test event implementation.
    #[derive(Debug, Clone, PartialEq)]
    struct TestEvent {
        timestamp: DateTime<Utc>,
        lifecycle: Lifecycle,
    }

    impl TimedEvent for TestEvent {
        fn timestamp(&self) -> DateTime<Utc> {
            self.timestamp
        }

        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }
    }

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 20, 6, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn started(minutes: i64) -> TestEvent {
        at(Lifecycle::Started, minutes)
    }

    fn paused(minutes: i64) -> TestEvent {
        at(Lifecycle::Paused, minutes)
    }

    fn resumed(minutes: i64) -> TestEvent {
        at(Lifecycle::Resumed, minutes)
    }

    fn completed(minutes: i64) -> TestEvent {
        at(Lifecycle::Completed, minutes)
    }

    fn exited(minutes: i64) -> TestEvent {
        at(Lifecycle::Exited, minutes)
    }

    fn at(lifecycle: Lifecycle, minutes: i64) -> TestEvent {
        TestEvent {
            timestamp: ts(minutes),
            lifecycle,
        }
    }

    fn minutes(result: &ReconciliationResult) -> i64 {
        result.learning_time.num_minutes()
    }

    #[test]
    fn test_pause_resume_then_complete() {
        let events = vec![started(0), paused(10), resumed(20), completed(30)];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 20);
        assert_eq!(result.completed_at, Some(ts(30)));
    }

    #[test]
    fn test_abandoned_second_attempt_ignored() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            started(40),
            paused(55),
        ];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 20);
        assert_eq!(result.completed_at, Some(ts(30)));
    }

    #[test]
    fn test_multiple_completions_in_one_attempt() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            paused(35),
            resumed(45),
            completed(50),
        ];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 30);
        assert_eq!(result.completed_at, Some(ts(50)));
    }

    #[test]
    fn test_two_committed_attempts_sum() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            started(40),
            paused(45),
            resumed(50),
            completed(60),
        ];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 35);
        assert_eq!(result.completed_at, Some(ts(60)));
    }

    #[test]
    fn test_unmatched_pauses_do_not_reduce_time() {
        let events = vec![
            started(0),
            paused(10),
            paused(15),
            paused(20),
            paused(25),
            paused(30),
            paused(35),
            completed(50),
        ];
        assert_eq!(minutes(&reconcile(&events)), 50);
    }

    #[test]
    fn test_exit_and_completion_share_timestamp() {
        let events = vec![started(0), exited(10), completed(10)];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 10);
        assert_eq!(result.completed_at, Some(ts(10)));
    }

    #[test]
    fn test_two_attempts_with_exits() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            exited(32),
            started(40),
            paused(45),
            resumed(55),
            completed(60),
            exited(62),
        ];
        assert_eq!(minutes(&reconcile(&events)), 30);
    }

    #[test]
    fn test_unsorted_events_with_abandoned_retry() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            started(40),
            paused(55),
            completed(30),
        ];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 20);
        assert_eq!(result.completed_at, Some(ts(30)));
    }

    #[test]
    fn test_many_pause_resume_pairs() {
        let mut events = vec![started(0)];
        for i in 1..50 {
            if i % 2 == 1 {
                events.push(paused(i * 5));
            } else {
                events.push(resumed(i * 5));
            }
        }
        events.push(completed(250));

        assert_eq!(minutes(&reconcile(&events)), 130);
    }

    #[test]
    fn test_completion_after_exit_counts_whole_span() {
        let events = vec![started(0), exited(10), completed(50)];
        assert_eq!(minutes(&reconcile(&events)), 50);
    }

    #[test]
    fn test_no_completion_yields_zero() {
        let events = vec![started(0), paused(10), resumed(20), exited(30)];
        assert_eq!(reconcile(&events), ReconciliationResult::default());
    }

    #[test]
    fn test_empty_batch_yields_zero() {
        let events: Vec<TestEvent> = vec![];
        let result = reconcile(&events);
        assert_eq!(result.learning_time_ms(), 0);
        assert!(!result.is_completed());
    }

    #[test]
    fn test_first_event_not_started_is_implicit_attempt() {
        let events = vec![resumed(5), paused(10), resumed(15), completed(25)];
        let result = reconcile(&events);
        assert_eq!(minutes(&result), 15);
        assert_eq!(result.completed_at, Some(ts(25)));
    }

    #[test]
    fn test_pause_after_last_completion_ignored() {
        let events = vec![started(0), completed(20), paused(25), resumed(40)];
        assert_eq!(minutes(&reconcile(&events)), 20);
    }

    #[test]
    fn test_order_independence() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            started(40),
            paused(45),
            resumed(50),
            completed(60),
        ];
        let expected = reconcile(&events);

        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(reconcile(&reversed), expected);

        for shift in 1..events.len() {
            let mut rotated = events.clone();
            rotated.rotate_left(shift);
            assert_eq!(reconcile(&rotated), expected, "rotation by {shift}");
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let events = vec![
            started(0),
            paused(10),
            resumed(20),
            completed(30),
            paused(35),
            resumed(45),
            completed(50),
        ];
        let sorted: Vec<TestEvent> = sort_chronologically(&events)
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(reconcile(&sorted), reconcile(&sorted));
        assert_eq!(reconcile(&sorted), reconcile(&events));
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let events = vec![completed(10), started(0), exited(10)];
        let sorted = sort_chronologically(&events);
        let kinds: Vec<_> = sorted.iter().map(|e| e.lifecycle.as_str()).collect();
        assert_eq!(kinds, vec!["started", "completed", "exited"]);
    }

    #[test]
    fn test_segment_attempts_covers_input() {
        let events = vec![
            paused(0),
            started(5),
            completed(10),
            started(20),
            started(30),
            completed(40),
        ];
        let attempts = segment_attempts(&events);
        let ranges: Vec<_> = attempts.iter().map(|a| a.range.clone()).collect();
        assert_eq!(ranges, vec![0..1, 1..3, 3..4, 4..6]);
        assert_eq!(attempts.iter().map(Attempt::len).sum::<usize>(), events.len());
    }

    #[test]
    fn test_segment_attempts_empty() {
        let events: Vec<TestEvent> = vec![];
        assert!(segment_attempts(&events).is_empty());
    }

    #[test]
    fn test_resolve_attempt_outcomes() {
        assert_eq!(
            resolve_attempt(&[started(0), paused(5)]),
            AttemptOutcome::Abandoned
        );
        assert_eq!(
            resolve_attempt(&[started(0), paused(5), resumed(8), completed(12)]),
            AttemptOutcome::Committed {
                net: TimeDelta::minutes(9),
                completed_at: ts(12),
            }
        );
    }

    #[test]
    fn test_paused_gaps_requires_adjacency() {
        let events = vec![paused(0), exited(2), resumed(5), paused(10), resumed(12)];
        assert_eq!(paused_gaps(&events), TimeDelta::minutes(2));
    }

    #[test]
    fn test_learning_time_never_negative() {
        // Out-of-order slice fed directly to the resolver.
        let events = vec![paused(0), resumed(30), completed(10)];
        match resolve_attempt(&events) {
            AttemptOutcome::Committed { net, .. } => assert_eq!(net, TimeDelta::zero()),
            AttemptOutcome::Abandoned => panic!("expected a committed attempt"),
        }
    }
}
