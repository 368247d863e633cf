//! Blocker retry supervisor.
//!
//! For every open item labelled blocked, counts failure comments from other
//! actors and either waits, moves the item back to todo for another
//! attempt, or opens one escalation item once the retry budget is spent.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::IssueBackend;
use crate::clock::{Clock, format_utc};
use crate::config::{SupervisorConfig, SupervisorRules};
use crate::error::{AdapterError, ExitKind, OpsError};
use crate::model::{ActorIdentity, Comment, LabelChange, NewItem, WorkItem};

pub const ESCALATION_LABELS: [&str; 3] = ["backlog", "priority:P1", "status:todo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorAction {
    /// No failure comments.
    None,
    WithinGrace,
    Retried,
    Escalated,
    AlreadyEscalated,
    Errored,
}

impl SupervisorAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WithinGrace => "within_grace",
            Self::Retried => "retried",
            Self::Escalated => "escalated",
            Self::AlreadyEscalated => "already_escalated",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub number: u64,
    pub title: String,
    pub failures: usize,
    pub last_failure: Option<String>,
    pub action: SupervisorAction,
    pub child_number: Option<u64>,
    pub child_url: Option<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorReport {
    pub started_at_utc: String,
    pub grace_hours: u32,
    pub max_fails: u32,
    pub dry_run: bool,
    pub processed: usize,
    pub errored: usize,
    pub items: Vec<ItemReport>,
}

impl SupervisorReport {
    #[must_use]
    pub const fn exit_kind(&self) -> ExitKind {
        if self.errored > 0 {
            ExitKind::Upstream
        } else {
            ExitKind::Success
        }
    }

    #[must_use]
    pub fn count(&self, action: SupervisorAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }
}

pub struct Supervisor<'a> {
    pub backend: &'a dyn IssueBackend,
    pub clock: &'a dyn Clock,
    pub identity: &'a ActorIdentity,
    pub config: &'a SupervisorConfig,
    pub rules: &'a SupervisorRules,
    pub dry_run: bool,
}

impl Supervisor<'_> {
    /// Process every blocked item once.
    ///
    /// Per-item adapter errors are recorded in the report and the batch
    /// continues.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Adapter`] when the blocked items cannot be listed.
    pub fn run(&self) -> Result<SupervisorReport, OpsError> {
        let now = self.clock.now();
        let blocked = self.backend.list_open(Some(&self.config.blocked_label))?;
        info!(count = blocked.len(), "blocked items listed");

        let mut items = Vec::with_capacity(blocked.len());
        for item in &blocked {
            let report = self.process_item(item, now).unwrap_or_else(|err| {
                warn!(item = item.number, error = %err, "item failed; continuing");
                ItemReport {
                    number: item.number,
                    title: item.title.clone(),
                    failures: 0,
                    last_failure: None,
                    action: SupervisorAction::Errored,
                    child_number: None,
                    child_url: None,
                    dry_run: self.dry_run,
                    error: Some(err.to_string()),
                }
            });
            items.push(report);
        }

        let errored = items
            .iter()
            .filter(|r| r.action == SupervisorAction::Errored)
            .count();
        Ok(SupervisorReport {
            started_at_utc: format_utc(now),
            grace_hours: self.config.grace_hours,
            max_fails: self.config.max_fails,
            dry_run: self.dry_run,
            processed: items.len() - errored,
            errored,
            items,
        })
    }

    fn process_item(&self, item: &WorkItem, now: DateTime<Utc>) -> Result<ItemReport, ItemError> {
        let comments = self.backend.get_comments(item.number)?;
        let failures: Vec<&Comment> = comments
            .iter()
            .filter(|c| !self.identity.is_self(&c.author) && self.rules.is_failure(&c.body))
            .collect();

        let mut report = ItemReport {
            number: item.number,
            title: item.title.clone(),
            failures: failures.len(),
            last_failure: None,
            action: SupervisorAction::None,
            child_number: None,
            child_url: None,
            dry_run: self.dry_run,
            error: None,
        };
        let Some(last_failure) = failures.iter().map(|c| c.created_at).max() else {
            return Ok(report);
        };
        report.last_failure = Some(format_utc(last_failure));

        let attempts = failures.len();
        let max_fails = usize::try_from(self.config.max_fails).unwrap_or(usize::MAX);
        if attempts >= max_fails {
            let escalated = comments
                .iter()
                .any(|c| self.identity.is_self(&c.author) && self.rules.is_followup_marker(&c.body));
            if escalated {
                report.action = SupervisorAction::AlreadyEscalated;
                return Ok(report);
            }
            report.action = SupervisorAction::Escalated;
            if self.dry_run {
                info!(item = item.number, "would escalate (dry run)");
                return Ok(report);
            }
            let new_item = escalation_item(item.number, self.config.max_fails, last_failure);
            let created = self.backend.create_item(&new_item)?;
            if created.number.is_none() {
                warn!(url = %created.url, "created escalation item has no parseable number");
            }
            report.child_number = created.number;
            report.child_url = Some(created.url.clone());
            let comment = escalation_comment(
                attempts,
                last_failure,
                &created.display_number(),
                &created.url,
            );
            self.backend
                .add_comment(item.number, &comment)
                .map_err(|source| ItemError::AfterCreate {
                    child: created.display_number(),
                    source,
                })?;
            info!(item = item.number, child = %created.display_number(), "escalated");
            return Ok(report);
        }

        // A grace period past the end of representable time never elapses.
        let due = TimeDelta::try_hours(i64::from(self.config.grace_hours))
            .and_then(|grace| last_failure.checked_add_signed(grace));
        if due.is_none_or(|due| now < due) {
            report.action = SupervisorAction::WithinGrace;
            return Ok(report);
        }

        report.action = SupervisorAction::Retried;
        if self.dry_run {
            info!(item = item.number, "would retry (dry run)");
            return Ok(report);
        }
        let change = retry_label_change(item, &self.config.blocked_label, &self.config.todo_label);
        if !change.is_empty() {
            self.backend.set_labels(item.number, &change)?;
        }
        let comment = retry_comment(
            self.config.grace_hours,
            last_failure,
            attempts + 1,
            self.config.max_fails,
        );
        self.backend.add_comment(item.number, &comment)?;
        info!(item = item.number, attempt = attempts + 1, "moved back to todo");
        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("follow-up #{child} was created but the parent comment failed: {source}")]
    AfterCreate { child: String, source: AdapterError },
}

/// Remove the blocked label if present and add todo if absent, judged on the
/// listed snapshot.
#[must_use]
pub fn retry_label_change(item: &WorkItem, blocked: &str, todo: &str) -> LabelChange {
    let mut change = LabelChange::default();
    if item.has_label(blocked) {
        change.remove.push(blocked.to_string());
    }
    if !item.has_label(todo) {
        change.add.push(todo.to_string());
    }
    change
}

#[must_use]
pub fn escalation_title(parent: u64, max_fails: u32) -> String {
    format!("Follow-up: External blocker for #{parent} after {max_fails} failed attempts")
}

#[must_use]
pub fn escalation_item(parent: u64, max_fails: u32, last_failure: DateTime<Utc>) -> NewItem {
    let body = format!(
        "## Problem\n\
         Item #{parent} is blocked by an external dependency. {max_fails} automated \
         attempts failed; the last failure was observed at {last}.\n\n\
         ## Goal\n\
         Resolve or work around the external blocker so #{parent} can continue.\n\n\
         ## Definition of Done\n\
         - [ ] Root cause of the external failure identified and documented\n\
         - [ ] Blocker removed, or an alternative path agreed and recorded on #{parent}\n\
         - [ ] #{parent} moved out of `status:blocked`\n",
        last = format_utc(last_failure),
    );
    NewItem {
        title: escalation_title(parent, max_fails),
        body,
        labels: ESCALATION_LABELS.iter().map(|l| (*l).to_string()).collect(),
    }
}

fn escalation_comment(attempts: usize, last_failure: DateTime<Utc>, child: &str, url: &str) -> String {
    format!(
        "Retry budget exhausted after {attempts} failed attempts (last failure {}). \
         Created follow-up issue #{child}: {url}",
        format_utc(last_failure)
    )
}

fn retry_comment(grace_hours: u32, last_failure: DateTime<Utc>, attempt: usize, max_fails: u32) -> String {
    format!(
        "Grace period of {grace_hours}h since the last external failure ({}) has elapsed. \
         Moving the item back to todo for retry {attempt}/{max_fails}.",
        format_utc(last_failure)
    )
}
