//! Import command for ingesting raw event logs into the local `SQLite` store.

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lt_db::{Database, EventRecord};

use crate::Config;

/// Outcome of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Lines read.
    pub read: usize,
    /// Events not seen before.
    pub inserted: usize,
}

/// One raw event log line, as imported and as dumped by `lt events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Generated when absent.
    #[serde(default)]
    pub event_id: Option<String>,
    pub student_id: String,
    pub kind: String,
    pub created_at: String,
    /// A JSON object, or a string holding the payload text verbatim.
    pub payload: serde_json::Value,
}

impl WireEvent {
    fn into_record(self) -> Result<EventRecord> {
        if self.student_id.trim().is_empty() {
            anyhow::bail!("missing student_id");
        }
        if self.kind.trim().is_empty() {
            anyhow::bail!("missing kind");
        }
        if self.created_at.trim().is_empty() {
            anyhow::bail!("missing created_at");
        }

        let event_id = match self.event_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                tracing::debug!(event_id = %id, "assigned event ID");
                id
            }
        };
        let payload = match self.payload {
            serde_json::Value::String(text) => text,
            value => serde_json::to_string(&value).context("failed to encode payload")?,
        };

        Ok(EventRecord {
            event_id,
            student_id: self.student_id,
            kind: self.kind,
            created_at: self.created_at,
            payload,
        })
    }
}

impl From<EventRecord> for WireEvent {
    fn from(record: EventRecord) -> Self {
        let payload = serde_json::from_str(&record.payload)
            .unwrap_or(serde_json::Value::String(record.payload));
        Self {
            event_id: Some(record.event_id),
            student_id: record.student_id,
            kind: record.kind,
            created_at: record.created_at,
            payload,
        }
    }
}

/// Reads JSON Lines from `reader` and stores new events.
pub fn run<R: BufRead>(reader: R, config: &Config) -> Result<ImportSummary> {
    let events = parse_events(reader)?;

    let mut db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let inserted = db
        .insert_events(&events)
        .context("failed to store events")?;
    Ok(ImportSummary {
        read: events.len(),
        inserted,
    })
}

fn parse_events<R: BufRead>(reader: R) -> Result<Vec<EventRecord>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: WireEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        let record = parsed
            .into_record()
            .with_context(|| format!("invalid event on line {}", idx + 1))?;
        events.push(record);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn parse_events_stores_payload_as_text() {
        let input = r#"{"event_id":"e1","student_id":"s1","kind":"learning_objective","created_at":"2021-12-20T06:00:00Z","payload":{"event":"started","session_id":"sess-1"}}"#;
        let events = parse_events(Cursor::new(input)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "e1");
        assert_eq!(
            events[0].payload,
            r#"{"event":"started","session_id":"sess-1"}"#
        );
    }

    #[test]
    fn parse_events_keeps_string_payload_verbatim() {
        let input = r#"{"event_id":"e1","student_id":"s1","kind":"learning_objective","created_at":"2021-12-20T06:00:00Z","payload":"{not json"}"#;
        let events = parse_events(Cursor::new(input)).unwrap();
        assert_eq!(events[0].payload, "{not json");
    }

    #[test]
    fn parse_events_assigns_missing_ids() {
        let input = "
{\"student_id\":\"s1\",\"kind\":\"learning_objective\",\"created_at\":\"2021-12-20T06:00:00Z\",\"payload\":{}}

{\"event_id\":\"\",\"student_id\":\"s1\",\"kind\":\"learning_objective\",\"created_at\":\"2021-12-20T06:00:00Z\",\"payload\":{}}
";
        let events = parse_events(Cursor::new(input)).unwrap();
        assert_eq!(events.len(), 2);
        assert!(Uuid::parse_str(&events[0].event_id).is_ok());
        assert_ne!(events[0].event_id, events[1].event_id);
    }

    #[test]
    fn parse_events_rejects_missing_student() {
        let input = r#"{"event_id":"e1","student_id":" ","kind":"learning_objective","created_at":"2021-12-20T06:00:00Z","payload":{}}"#;
        let err = parse_events(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("invalid event on line 1"));
    }

    #[test]
    fn parse_events_reports_bad_json_line() {
        let input = "{}\nnot json";
        let err = parse_events(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn wire_event_from_record_decodes_payload() {
        let record = EventRecord {
            event_id: "e1".to_string(),
            student_id: "s1".to_string(),
            kind: "learning_objective".to_string(),
            created_at: "2021-12-20T06:00:00Z".to_string(),
            payload: r#"{"event":"paused"}"#.to_string(),
        };
        let wire = WireEvent::from(record.clone());
        assert_eq!(wire.payload["event"], "paused");
        assert_eq!(wire.into_record().unwrap(), record);
    }

    #[test]
    fn run_deduplicates_by_event_id() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("lt.db"),
        };
        let input = r#"{"event_id":"e1","student_id":"s1","kind":"learning_objective","created_at":"2021-12-20T06:00:00Z","payload":{}}
{"event_id":"e1","student_id":"s1","kind":"learning_objective","created_at":"2021-12-20T06:00:00Z","payload":{}}"#;

        let summary = run(Cursor::new(input), &config).unwrap();
        assert_eq!(summary, ImportSummary { read: 2, inserted: 1 });

        let again = run(Cursor::new(input), &config).unwrap();
        assert_eq!(again.inserted, 0);
    }
}
