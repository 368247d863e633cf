//! Normalised cloud audit events and their fingerprints.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{format_utc, parse_utc};

/// Sentinel for a fingerprint component the event did not carry.
pub const MISSING: &str = "-";

/// One audit log record, flattened from the lookup envelope and the nested
/// event detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_time: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub event_source: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub account: Option<String>,
    pub principal: Option<String>,
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl AuditEvent {
    /// Normalise one entry of a `LookupEvents` response page.
    ///
    /// Nested detail wins over envelope fields where both exist, except for
    /// the principal, where the envelope `Username` is authoritative.
    #[must_use]
    pub fn from_lookup_entry(entry: &Value) -> Self {
        let detail = entry
            .get("CloudTrailEvent")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .filter(Value::is_object)
            .unwrap_or(Value::Null);
        let identity = detail.get("userIdentity").filter(|v| v.is_object());

        let event_time = text(&detail, "eventTime")
            .or_else(|| text(entry, "EventTime"))
            .and_then(|raw| parse_utc(&raw));

        Self {
            event_time,
            event_name: text(&detail, "eventName").or_else(|| text(entry, "EventName")),
            event_source: text(&detail, "eventSource").or_else(|| text(entry, "EventSource")),
            source_ip: text(&detail, "sourceIPAddress"),
            user_agent: text(&detail, "userAgent"),
            account: text(&detail, "recipientAccountId")
                .or_else(|| identity.and_then(|id| text(id, "accountId"))),
            principal: text(entry, "Username")
                .or_else(|| identity.and_then(|id| text(id, "userName"))),
            region: text(&detail, "awsRegion")
                .or_else(|| text(&detail, "region"))
                .or_else(|| text(entry, "AwsRegion")),
            raw: detail,
        }
    }

    /// Normalise an already-flattened record (one NDJSON line).
    ///
    /// Accepts both the snake-case field names used here and the
    /// `recipient_account` / `username` spellings of older exports.
    #[must_use]
    pub fn from_flat_record(record: &Value) -> Self {
        Self {
            event_time: text(record, "event_time").and_then(|raw| parse_utc(&raw)),
            event_name: text(record, "event_name"),
            event_source: text(record, "event_source"),
            source_ip: text(record, "source_ip"),
            user_agent: text(record, "user_agent"),
            account: text(record, "account").or_else(|| text(record, "recipient_account")),
            principal: text(record, "principal").or_else(|| text(record, "username")),
            region: text(record, "region"),
            raw: Value::Null,
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            account: or_missing(self.account.as_deref()),
            principal: or_missing(self.principal.as_deref()),
            source_ip: or_missing(self.source_ip.as_deref()),
            user_agent: or_missing(self.user_agent.as_deref()),
        }
    }

    #[must_use]
    pub fn event_name_or_missing(&self) -> &str {
        self.event_name.as_deref().unwrap_or(MISSING)
    }

    #[must_use]
    pub fn event_source_or_missing(&self) -> &str {
        self.event_source.as_deref().unwrap_or(MISSING)
    }

    #[must_use]
    pub fn event_time_display(&self) -> String {
        self.event_time.map_or_else(|| MISSING.to_string(), format_utc)
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    let raw = match value.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!raw.is_empty()).then_some(raw)
}

fn or_missing(value: Option<&str>) -> String {
    value.map_or_else(|| MISSING.to_string(), ToString::to_string)
}

/// Identity of a caller: `(account, principal, source_ip, user_agent)`.
///
/// Field order defines the lexicographic tie-break order in reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint {
    pub account: String,
    pub principal: String,
    pub source_ip: String,
    pub user_agent: String,
}

impl Fingerprint {
    /// Short stable identifier (`fp:` + 12 hex chars of BLAKE3).
    #[must_use]
    pub fn short_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [&self.account, &self.principal, &self.source_ip, &self.user_agent] {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1f");
        }
        let hex = hasher.finalize().to_hex();
        format!("fp:{}", &hex.as_str()[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account={} principal={} source_ip={} user_agent={}",
            self.account, self.principal, self.source_ip, self.user_agent
        )
    }
}
