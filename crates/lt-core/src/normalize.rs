//! Raw event log normalization.
//!
//! Event logs arrive as loosely-typed records: a `kind`, a creation timestamp
//! and a JSON payload. Normalization decodes them once into
//! [`LearningEvent`]s so nothing downstream inspects payload maps again.
//!
//! Records that are not learning objective lifecycle events are ignored.
//! Records that *claim* to be lifecycle events but cannot be decoded are
//! malformed; [`normalize_batch`] skips them individually and keeps going.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::event::LearningEvent;
use crate::lifecycle::{LEARNING_OBJECTIVE_KIND, Lifecycle};
use crate::types::{CorrelationKey, EventId, LoId, SessionId, StudentId, StudyPlanItemId};

/// Layouts accepted besides RFC 3339, as written by older clients.
const LEGACY_TIMESTAMP_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f"];

/// A raw event log as stored by the ingestion side.
///
/// This trait lets normalization read straight from storage rows (e.g.,
/// `EventRecord` from lt-db) without an intermediate copy.
pub trait RawEventLog {
    fn event_id(&self) -> &str;
    fn student_id(&self) -> &str;
    /// Event kind, e.g. `learning_objective`.
    fn kind(&self) -> &str;
    /// Creation timestamp as written by the client.
    fn created_at(&self) -> &str;
    /// JSON payload text.
    fn payload(&self) -> &str;
}

/// Why a single record could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    /// The payload is not valid JSON for a lifecycle payload.
    #[error("event {event_id}: undecodable payload: {message}")]
    Payload { event_id: String, message: String },

    /// A required field is absent or empty.
    #[error("event {event_id}: missing {field}")]
    MissingField {
        event_id: String,
        field: &'static str,
    },

    /// The creation timestamp could not be parsed.
    #[error("event {event_id}: invalid timestamp {timestamp}")]
    Timestamp { event_id: String, timestamp: String },
}

/// Outcome of normalizing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A lifecycle event ready for reconciliation.
    Event(LearningEvent),
    /// Not a learning objective lifecycle event; passed over.
    Ignored,
}

/// Result of normalizing a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub events: Vec<LearningEvent>,
    /// Records that were not lifecycle events.
    pub ignored: usize,
    /// Records skipped because they could not be decoded.
    pub malformed: usize,
}

#[derive(Debug, Deserialize)]
struct LifecyclePayload {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    lo_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    study_plan_item_id: Option<String>,
    #[serde(default)]
    time_spent: Option<f64>,
}

/// Decodes a single raw record.
pub fn normalize<R: RawEventLog + ?Sized>(raw: &R) -> Result<Normalized, MalformedEvent> {
    if raw.kind() != LEARNING_OBJECTIVE_KIND {
        return Ok(Normalized::Ignored);
    }

    let event_id = raw.event_id();
    let payload: LifecyclePayload =
        serde_json::from_str(raw.payload()).map_err(|err| MalformedEvent::Payload {
            event_id: event_id.to_string(),
            message: err.to_string(),
        })?;

    let Some(name) = payload.event.as_deref() else {
        return Err(missing(event_id, "event"));
    };
    let lifecycle = Lifecycle::from(name);
    if !lifecycle.is_known() {
        return Ok(Normalized::Ignored);
    }

    let id = EventId::new(event_id).map_err(|_| missing(event_id, "event_id"))?;
    let student_id = StudentId::new(raw.student_id()).map_err(|_| missing(event_id, "student_id"))?;
    let session_id = payload
        .session_id
        .and_then(|s| SessionId::new(s).ok())
        .ok_or_else(|| missing(event_id, "session_id"))?;
    let timestamp = parse_timestamp(raw.created_at()).ok_or_else(|| MalformedEvent::Timestamp {
        event_id: event_id.to_string(),
        timestamp: raw.created_at().to_string(),
    })?;

    Ok(Normalized::Event(LearningEvent {
        id,
        key: CorrelationKey::new(student_id, session_id),
        timestamp,
        lifecycle,
        // Clients omit empty identifiers, but some send "" instead.
        lo_id: payload.lo_id.and_then(|s| LoId::new(s).ok()),
        study_plan_item_id: payload
            .study_plan_item_id
            .and_then(|s| StudyPlanItemId::new(s).ok()),
        time_spent: payload.time_spent,
    }))
}

/// Decodes a batch, skipping malformed records one at a time.
pub fn normalize_batch<'a, R, I>(records: I) -> NormalizedBatch
where
    R: RawEventLog + ?Sized + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut batch = NormalizedBatch::default();
    for raw in records {
        match normalize(raw) {
            Ok(Normalized::Event(event)) => batch.events.push(event),
            Ok(Normalized::Ignored) => batch.ignored += 1,
            Err(err) => {
                tracing::warn!(event_id = raw.event_id(), error = %err, "skipping malformed event");
                batch.malformed += 1;
            }
        }
    }
    batch
}

fn missing(event_id: &str, field: &'static str) -> MalformedEvent {
    MalformedEvent::MissingField {
        event_id: event_id.to_string(),
        field,
    }
}

/// Parses RFC 3339, falling back to the legacy space-separated layouts.
/// Legacy timestamps without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, LEGACY_TIMESTAMP_LAYOUTS[0]) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, LEGACY_TIMESTAMP_LAYOUTS[1])
        .ok()
        .map(|naive| naive.and_utc())
}
