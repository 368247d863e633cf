//! Workstream balance auditor.
//!
//! Classifies the active open inventory into three workstreams by whole-word
//! keyword match and raises a single remediation item when the spread
//! between the largest and smallest workstream exceeds the configured gap.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::IssueBackend;
use crate::config::{BalanceConfig, ConfigError};
use crate::error::{ExitKind, OpsError};
use crate::model::{NewItem, WorkItem};

pub const REMEDIATION_LABELS: [&str; 3] = ["backlog", "priority:P0", "status:todo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workstream {
    Development,
    Documentation,
    Testing,
}

impl Workstream {
    pub const ALL: [Self; 3] = [Self::Development, Self::Documentation, Self::Testing];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
        }
    }
}

impl fmt::Display for Workstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-workstream counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkstreamTally {
    pub development: usize,
    pub documentation: usize,
    pub testing: usize,
}

impl WorkstreamTally {
    #[must_use]
    pub const fn get(&self, stream: Workstream) -> usize {
        match stream {
            Workstream::Development => self.development,
            Workstream::Documentation => self.documentation,
            Workstream::Testing => self.testing,
        }
    }

    pub const fn increment(&mut self, stream: Workstream) {
        match stream {
            Workstream::Development => self.development += 1,
            Workstream::Documentation => self.documentation += 1,
            Workstream::Testing => self.testing += 1,
        }
    }

    #[must_use]
    pub fn min(&self) -> usize {
        Workstream::ALL.iter().map(|s| self.get(*s)).min().unwrap_or(0)
    }

    #[must_use]
    pub fn max(&self) -> usize {
        Workstream::ALL.iter().map(|s| self.get(*s)).max().unwrap_or(0)
    }

    #[must_use]
    pub fn spread(&self) -> usize {
        self.max() - self.min()
    }

    /// Strictly greater than `gap`; ties among the largest buckets alone do
    /// not count.
    #[must_use]
    pub fn is_imbalanced(&self, gap: u32) -> bool {
        self.spread() > usize::try_from(gap).unwrap_or(usize::MAX)
    }

    /// Workstreams at the minimum count.
    #[must_use]
    pub fn lagging(&self) -> Vec<Workstream> {
        let min = self.min();
        Workstream::ALL
            .into_iter()
            .filter(|s| self.get(*s) == min)
            .collect()
    }

    /// `development: 2, documentation: 1, testing: 0`
    #[must_use]
    pub fn counts_line(&self) -> String {
        Workstream::ALL
            .iter()
            .map(|s| format!("{s}: {}", self.get(*s)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ordered keyword matchers; the first matching workstream wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Workstream, Regex)>,
}

impl Classifier {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the workstream list is invalid.
    pub fn from_config(config: &BalanceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = config
            .workstreams
            .iter()
            .map(|rule| {
                let alternatives = rule
                    .keywords
                    .iter()
                    .map(|kw| regex::escape(kw.trim()))
                    .collect::<Vec<_>>()
                    .join("|");
                let pattern = format!(r"\b(?:{alternatives})\b");
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (rule.name, re))
                    .map_err(|err| ConfigError::Regex {
                        key: format!("balance.workstreams.{}", rule.name),
                        pattern,
                        message: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn classify(&self, text: &str) -> Option<Workstream> {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(stream, _)| *stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    Apply,
    DryRun,
    /// Tally only; the remediation title is not even queried.
    ReportOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Remediation {
    NotNeeded,
    Skipped,
    Created { number: Option<u64>, url: String },
    WouldCreate,
    AlreadyOpen { number: u64 },
    Closed { number: u64 },
    WouldClose { number: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedItem {
    pub number: u64,
    pub title: String,
    pub workstream: Option<Workstream>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub tally: WorkstreamTally,
    pub unclassified: usize,
    pub excluded: usize,
    pub imbalance_gap: u32,
    pub spread: usize,
    pub imbalanced: bool,
    pub remediation: Remediation,
    pub items: Vec<ClassifiedItem>,
}

impl BalanceReport {
    #[must_use]
    pub const fn exit_kind(&self) -> ExitKind {
        if self.imbalanced {
            ExitKind::Detected
        } else {
            ExitKind::Success
        }
    }

    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Workstream balance".to_string(),
            String::new(),
            "| Workstream | Open items |".to_string(),
            "|---|---|".to_string(),
        ];
        for stream in Workstream::ALL {
            lines.push(format!("| {stream} | {} |", self.tally.get(stream)));
        }
        lines.push(format!("| unclassified | {} |", self.unclassified));
        lines.push(String::new());
        lines.push(format!(
            "Spread {} (allowed {}): {}",
            self.spread,
            self.imbalance_gap,
            if self.imbalanced { "IMBALANCED" } else { "balanced" }
        ));
        lines.join("\n") + "\n"
    }
}

pub struct BalanceAuditor<'a> {
    pub backend: &'a dyn IssueBackend,
    pub config: &'a BalanceConfig,
    pub classifier: &'a Classifier,
    pub mode: BalanceMode,
}

impl BalanceAuditor<'_> {
    /// # Errors
    ///
    /// Any adapter failure aborts the run with [`OpsError::Adapter`]; nothing
    /// is created after a failed read.
    pub fn run(&self) -> Result<BalanceReport, OpsError> {
        let inventory = self.backend.list_open(None)?;
        let (tally, unclassified, excluded, items) = self.tally(&inventory);
        let imbalanced = tally.is_imbalanced(self.config.imbalance_gap);
        info!(counts = %tally.counts_line(), unclassified, excluded, imbalanced, "workstreams tallied");

        let remediation = match self.mode {
            BalanceMode::ReportOnly => Remediation::Skipped,
            BalanceMode::Apply | BalanceMode::DryRun => self.remediate(&tally, imbalanced)?,
        };

        Ok(BalanceReport {
            tally,
            unclassified,
            excluded,
            imbalance_gap: self.config.imbalance_gap,
            spread: tally.spread(),
            imbalanced,
            remediation,
            items,
        })
    }

    fn tally(&self, inventory: &[WorkItem]) -> (WorkstreamTally, usize, usize, Vec<ClassifiedItem>) {
        let mut tally = WorkstreamTally::default();
        let mut unclassified = 0;
        let mut excluded = 0;
        let mut items = Vec::new();
        for item in inventory {
            let is_excluded = item.title == self.config.remediation_title
                || self
                    .config
                    .excluded_labels
                    .iter()
                    .any(|label| item.has_label(label));
            if is_excluded {
                excluded += 1;
                continue;
            }
            let workstream = self.classifier.classify(&item.text());
            match workstream {
                Some(stream) => tally.increment(stream),
                None => unclassified += 1,
            }
            items.push(ClassifiedItem {
                number: item.number,
                title: item.title.clone(),
                workstream,
            });
        }
        (tally, unclassified, excluded, items)
    }

    fn remediate(&self, tally: &WorkstreamTally, imbalanced: bool) -> Result<Remediation, OpsError> {
        let titles = self.backend.list_open_titles()?;
        let existing = titles.get(&self.config.remediation_title).copied();
        let dry_run = self.mode == BalanceMode::DryRun;

        match (imbalanced, existing) {
            (true, Some(number)) => {
                info!(number, "remediation item already open");
                Ok(Remediation::AlreadyOpen { number })
            }
            (true, None) if dry_run => Ok(Remediation::WouldCreate),
            (true, None) => {
                let created = self.backend.create_item(&remediation_item(
                    &self.config.remediation_title,
                    tally,
                    self.config.imbalance_gap,
                ))?;
                if created.number.is_none() {
                    warn!(url = %created.url, "created remediation item has no parseable number");
                }
                info!(number = %created.display_number(), "remediation item created");
                Ok(Remediation::Created {
                    number: created.number,
                    url: created.url,
                })
            }
            (false, Some(number)) if self.config.auto_close => {
                if dry_run {
                    return Ok(Remediation::WouldClose { number });
                }
                self.backend.add_comment(
                    number,
                    &format!(
                        "Workstream balance restored ({}). Closing automatically.",
                        tally.counts_line()
                    ),
                )?;
                self.backend.close_item(number)?;
                info!(number, "remediation item closed");
                Ok(Remediation::Closed { number })
            }
            (false, _) => Ok(Remediation::NotNeeded),
        }
    }
}

#[must_use]
pub fn remediation_item(title: &str, tally: &WorkstreamTally, gap: u32) -> NewItem {
    let counts = Workstream::ALL
        .iter()
        .map(|s| format!("- {s}: {}", tally.get(*s)))
        .collect::<Vec<_>>()
        .join("\n");
    let lagging = tally
        .lagging()
        .into_iter()
        .map(Workstream::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let body = format!(
        "## Problem\n\
         Open work is unevenly spread across workstreams: the spread between the \
         largest and smallest workstream is {spread}, above the allowed {gap}.\n\n\
         Current counts:\n{counts}\n\n\
         ## Goal\n\
         Bring development, documentation and testing back within {gap} open items \
         of each other.\n\n\
         ## Definition of Done\n\
         - [ ] Work added or re-prioritised for: {lagging}\n\
         - [ ] A follow-up balance audit reports no imbalance\n",
        spread = tally.spread(),
    );
    NewItem {
        title: title.to_string(),
        body,
        labels: REMEDIATION_LABELS.iter().map(|l| (*l).to_string()).collect(),
    }
}
