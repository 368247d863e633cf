use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Open/closed state of a tracked work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Immutable snapshot of one work item as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub state: ItemState,
    #[serde(default)]
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Title and body joined for keyword scans.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// One comment on a work item. Backends return them oldest-first, but
/// callers must not rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// Request to open a new work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewItem {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Result of creating a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedItem {
    /// URL-like locator returned by the backend.
    pub url: String,
    /// Number parsed from [`Self::url`]; `None` when the URL had no
    /// `/issues/<n>` segment.
    pub number: Option<u64>,
}

impl CreatedItem {
    /// Build from a backend-returned locator, extracting the number.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let number = extract_issue_number(&url);
        Self { url, number }
    }

    /// Number for display; `?` when it could not be extracted.
    #[must_use]
    pub fn display_number(&self) -> String {
        self.number
            .map_or_else(|| "?".to_string(), |number| number.to_string())
    }
}

/// Label mutation submitted as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelChange {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply the change to a label set. Removals happen before additions.
    #[must_use]
    pub fn apply(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        let mut next = current.clone();
        for label in &self.remove {
            next.remove(label);
        }
        for label in &self.add {
            next.insert(label.clone());
        }
        next
    }
}

const ISSUE_NUMBER_PATTERN: &str = r"/issues/(\d+)";

static ISSUE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ISSUE_NUMBER_PATTERN).expect("static issue-number regex"));

/// Extract the item number from a created-item URL (`.../issues/<n>`).
#[must_use]
pub fn extract_issue_number(url: &str) -> Option<u64> {
    ISSUE_NUMBER_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
