use serde::{Deserialize, Serialize};

/// How a comment author is compared against the tool's own login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMatch {
    /// Author login must equal the configured identity.
    #[default]
    Exact,
    /// Author login must start with the configured identity
    /// (e.g. app bots suffixed with `[bot]`).
    Prefix,
}

/// The actor the tool itself posts as.
///
/// Self-authored comments are visible for escalation detection but never
/// count as failure signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorIdentity {
    pub login: String,
    pub match_mode: IdentityMatch,
}

impl ActorIdentity {
    pub fn new(login: impl Into<String>, match_mode: IdentityMatch) -> Self {
        Self {
            login: login.into(),
            match_mode,
        }
    }

    #[must_use]
    pub fn is_self(&self, author: &str) -> bool {
        if self.login.is_empty() {
            return false;
        }
        match self.match_mode {
            IdentityMatch::Exact => author == self.login,
            IdentityMatch::Prefix => author.starts_with(&self.login),
        }
    }
}
