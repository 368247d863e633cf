//! Cloud audit log sources.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AdapterError;
use crate::model::AuditEvent;

/// Name of the audit service's own query event. Running the audit emits one
/// of these, so it is filtered unless explicitly included.
pub const SELF_INSPECTION_EVENT: &str = "LookupEvents";

/// Operation name used in diagnostics for audit lookups.
pub const LOOKUP_OPERATION: &str = "cloudtrail:LookupEvents";

/// Closed time window `[start, end]`, optionally restricted to one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub principal: Option<String>,
}

impl AuditQuery {
    /// Whether `event` falls inside the window and matches the principal.
    /// Events without a timestamp are kept.
    #[must_use]
    pub fn admits(&self, event: &AuditEvent) -> bool {
        let in_window = event
            .event_time
            .is_none_or(|ts| ts >= self.start && ts <= self.end);
        let principal_ok = self
            .principal
            .as_deref()
            .is_none_or(|want| event.principal.as_deref() == Some(want));
        in_window && principal_ok
    }
}

/// Events returned by a source plus how many raw records were unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupOutcome {
    pub events: Vec<AuditEvent>,
    pub invalid_records: usize,
}

pub trait CloudAuditSource {
    /// All events in the query window, self-inspection events included.
    fn lookup(&self, query: &AuditQuery) -> Result<LookupOutcome, AdapterError>;
}

/// One `LookupEvents` response page: normalised events and the next token.
///
/// # Errors
///
/// Returns a decode error when `Events` is present but not an array.
pub fn parse_lookup_page(page: &Value) -> Result<(Vec<AuditEvent>, Option<String>), AdapterError> {
    let events = match page.get("Events") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries.iter().map(AuditEvent::from_lookup_entry).collect(),
        Some(_) => {
            return Err(AdapterError::decode(
                LOOKUP_OPERATION,
                "`Events` is not an array",
            ));
        }
    };
    let next = page
        .get("NextToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string);
    Ok((events, next))
}

/// Replays events from a file: either a lookup page (`{"Events": [...]}`),
/// a JSON array, or NDJSON with one record per line.
#[derive(Debug, Clone)]
pub struct FileAuditSource {
    path: PathBuf,
}

impl FileAuditSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn decode(content: &str) -> Result<LookupOutcome, AdapterError> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(doc) = serde_json::from_str::<Value>(content) {
                return Self::decode_document(&doc);
            }
        }
        let mut outcome = LookupOutcome::default();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(record) if record.is_object() => outcome.events.push(record_event(&record)),
                _ => outcome.invalid_records += 1,
            }
        }
        Ok(outcome)
    }

    fn decode_document(doc: &Value) -> Result<LookupOutcome, AdapterError> {
        if let Value::Array(records) = doc {
            let mut outcome = LookupOutcome::default();
            for record in records {
                if record.is_object() {
                    outcome.events.push(record_event(record));
                } else {
                    outcome.invalid_records += 1;
                }
            }
            return Ok(outcome);
        }
        if doc.get("Events").is_some() {
            let (events, _) = parse_lookup_page(doc)?;
            return Ok(LookupOutcome {
                events,
                invalid_records: 0,
            });
        }
        Ok(LookupOutcome {
            events: vec![record_event(doc)],
            invalid_records: 0,
        })
    }
}

fn record_event(record: &Value) -> AuditEvent {
    if record.get("CloudTrailEvent").is_some() || record.get("EventName").is_some() {
        AuditEvent::from_lookup_entry(record)
    } else {
        AuditEvent::from_flat_record(record)
    }
}

impl CloudAuditSource for FileAuditSource {
    fn lookup(&self, query: &AuditQuery) -> Result<LookupOutcome, AdapterError> {
        let content = std::fs::read_to_string(&self.path).map_err(|err| {
            AdapterError::transport(
                LOOKUP_OPERATION,
                format!("cannot read {}: {err}", self.path.display()),
            )
        })?;
        let mut outcome = Self::decode(&content)?;
        let before = outcome.events.len();
        outcome.events.retain(|event| query.admits(event));
        tracing::debug!(
            path = %self.path.display(),
            read = before,
            kept = outcome.events.len(),
            invalid = outcome.invalid_records,
            "replayed audit events"
        );
        Ok(outcome)
    }
}
