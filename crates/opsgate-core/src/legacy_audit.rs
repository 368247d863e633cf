//! Legacy-credential audit over the cloud audit log.
//!
//! Looks back over a window, drops the audit service's own query events
//! unless asked not to, and ranks the remaining callers by fingerprint.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::audit_source::{AuditQuery, CloudAuditSource, SELF_INSPECTION_EVENT};
use crate::clock::{Clock, format_utc};
use crate::config::AuditConfig;
use crate::error::{ExitKind, OpsError};
use crate::model::{AuditEvent, Fingerprint};

pub const LOOKBACK_VARIABLE: &str = "LOOKBACK_HOURS";

/// Parse and check a lookback value taken from the environment or a flag.
///
/// # Errors
///
/// [`OpsError::InvalidWindow`] naming `LOOKBACK_HOURS` for non-integers and
/// values `<= 0`.
pub fn parse_lookback(raw: &str) -> Result<i64, OpsError> {
    let value = raw.trim().parse::<i64>().map_err(|_| OpsError::InvalidWindow {
        variable: LOOKBACK_VARIABLE.to_string(),
        message: format!("must be a positive integer (got {raw:?})"),
    })?;
    check_lookback(value)
}

/// # Errors
///
/// [`OpsError::InvalidWindow`] for values `<= 0`.
pub fn check_lookback(hours: i64) -> Result<i64, OpsError> {
    if hours <= 0 {
        return Err(OpsError::InvalidWindow {
            variable: LOOKBACK_VARIABLE.to_string(),
            message: format!("must be a positive integer (got {hours})"),
        });
    }
    Ok(hours)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Clean,
    LegacyEventsFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditWindow {
    pub start_utc: String,
    pub end_utc: String,
    pub lookback_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintStat {
    pub rank: usize,
    pub id: String,
    pub count: usize,
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
    pub latest_event_utc: String,
    pub event_sources: Vec<String>,
    pub event_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_time_utc: String,
    pub event_name: String,
    pub event_source: String,
    pub fingerprint_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyAuditReport {
    pub window: AuditWindow,
    pub include_lookup_events: bool,
    pub principal: Option<String>,
    pub events_raw: usize,
    pub events_analyzed: usize,
    pub lookup_events_filtered: usize,
    pub invalid_records: usize,
    pub fingerprints_total: usize,
    pub top_fingerprints: Vec<FingerprintStat>,
    pub latest_events: Vec<EventSummary>,
    pub status: AuditStatus,
    pub exit_code: u8,
}

impl LegacyAuditReport {
    #[must_use]
    pub const fn exit_kind(&self) -> ExitKind {
        match self.status {
            AuditStatus::Clean => ExitKind::Success,
            AuditStatus::LegacyEventsFound => ExitKind::Detected,
        }
    }

    /// Plain-text rendering. Deterministic for a given event list.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let scope = format!(
            "window {} .. {} ({}h), include_lookup_events={}, lookup_events_filtered={}",
            self.window.start_utc,
            self.window.end_utc,
            self.window.lookback_hours,
            self.include_lookup_events,
            self.lookup_events_filtered,
        );
        if self.status == AuditStatus::Clean {
            let _ = writeln!(out, "No legacy events ({scope})");
            return out;
        }
        let _ = writeln!(
            out,
            "Legacy events found: {} event(s) from {} fingerprint(s) ({scope})",
            self.events_analyzed, self.fingerprints_total
        );
        out.push_str("\nTop Fingerprints\n");
        for stat in &self.top_fingerprints {
            let _ = writeln!(
                out,
                "{:>3}. {} count={} latest={} {}",
                stat.rank, stat.id, stat.count, stat.latest_event_utc, stat.fingerprint
            );
            let _ = writeln!(
                out,
                "     sources={} names={}",
                stat.event_sources.join(","),
                stat.event_names.join(",")
            );
        }
        if !self.latest_events.is_empty() {
            out.push_str("\nLatest Events\n");
            for event in &self.latest_events {
                let _ = writeln!(
                    out,
                    "  {} {} {} {}",
                    event.event_time_utc, event.event_name, event.event_source, event.fingerprint_id
                );
            }
        }
        out
    }
}

pub struct LegacyAudit<'a> {
    pub source: &'a dyn CloudAuditSource,
    pub clock: &'a dyn Clock,
    pub config: &'a AuditConfig,
}

impl LegacyAudit<'_> {
    /// # Errors
    ///
    /// [`OpsError::InvalidWindow`] for a non-positive lookback or one that
    /// reaches past the representable time range (exit 20),
    /// [`OpsError::Adapter`] when the lookup fails (exit 30).
    pub fn run(&self) -> Result<LegacyAuditReport, OpsError> {
        let lookback_hours = check_lookback(self.config.lookback_hours)?;
        let end = self.clock.now();
        let start = TimeDelta::try_hours(lookback_hours)
            .and_then(|window| end.checked_sub_signed(window))
            .ok_or_else(|| OpsError::InvalidWindow {
                variable: LOOKBACK_VARIABLE.to_string(),
                message: format!("is too large (got {lookback_hours})"),
            })?;
        let query = AuditQuery {
            start,
            end,
            principal: self.config.legacy_user.clone(),
        };
        let outcome = self.source.lookup(&query)?;
        let events_raw = outcome.events.len();

        let (events, filtered): (Vec<AuditEvent>, Vec<AuditEvent>) = outcome
            .events
            .into_iter()
            .partition(|event| {
                self.config.include_lookup_events
                    || event.event_name.as_deref() != Some(SELF_INSPECTION_EVENT)
            });
        info!(
            events_raw,
            analyzed = events.len(),
            filtered = filtered.len(),
            invalid = outcome.invalid_records,
            "audit events collected"
        );

        let ranked = rank_fingerprints(&events);
        let status = if events.is_empty() {
            AuditStatus::Clean
        } else {
            AuditStatus::LegacyEventsFound
        };
        let exit_code = match status {
            AuditStatus::Clean => ExitKind::Success.code(),
            AuditStatus::LegacyEventsFound => ExitKind::Detected.code(),
        };

        Ok(LegacyAuditReport {
            window: AuditWindow {
                start_utc: format_utc(start),
                end_utc: format_utc(end),
                lookback_hours,
            },
            include_lookup_events: self.config.include_lookup_events,
            principal: query.principal,
            events_raw,
            events_analyzed: events.len(),
            lookup_events_filtered: filtered.len(),
            invalid_records: outcome.invalid_records,
            fingerprints_total: ranked.len(),
            top_fingerprints: ranked.into_iter().take(self.config.top_limit).collect(),
            latest_events: latest_events(&events, self.config.recent_limit),
            status,
            exit_code,
        })
    }
}

#[derive(Default)]
struct Aggregate {
    count: usize,
    latest: Option<DateTime<Utc>>,
    sources: BTreeSet<String>,
    names: BTreeSet<String>,
}

/// Group events by fingerprint, ordered by count descending and then by
/// fingerprint so equal counts always come out in the same order.
#[must_use]
pub fn rank_fingerprints(events: &[AuditEvent]) -> Vec<FingerprintStat> {
    let mut groups: BTreeMap<Fingerprint, Aggregate> = BTreeMap::new();
    for event in events {
        let agg = groups.entry(event.fingerprint()).or_default();
        agg.count += 1;
        agg.latest = agg.latest.max(event.event_time);
        agg.sources.insert(event.event_source_or_missing().to_string());
        agg.names.insert(event.event_name_or_missing().to_string());
    }

    let mut ranked: Vec<(Fingerprint, Aggregate)> = groups.into_iter().collect();
    ranked.sort_by(|(fa, a), (fb, b)| b.count.cmp(&a.count).then_with(|| fa.cmp(fb)));
    ranked
        .into_iter()
        .enumerate()
        .map(|(idx, (fingerprint, agg))| FingerprintStat {
            rank: idx + 1,
            id: fingerprint.short_id(),
            count: agg.count,
            latest_event_utc: agg
                .latest
                .map_or_else(|| crate::model::MISSING.to_string(), format_utc),
            fingerprint,
            event_sources: agg.sources.into_iter().collect(),
            event_names: agg.names.into_iter().collect(),
        })
        .collect()
}

fn latest_events(events: &[AuditEvent], limit: usize) -> Vec<EventSummary> {
    let mut sorted: Vec<&AuditEvent> = events.iter().collect();
    sorted.sort_by_key(|event| {
        (
            Reverse(event.event_time),
            event.fingerprint(),
            event.event_name.clone(),
        )
    });
    sorted
        .into_iter()
        .take(limit)
        .map(|event| EventSummary {
            event_time_utc: event.event_time_display(),
            event_name: event.event_name_or_missing().to_string(),
            event_source: event.event_source_or_missing().to_string(),
            fingerprint_id: event.fingerprint().short_id(),
        })
        .collect()
}
