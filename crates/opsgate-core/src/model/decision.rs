//! Promote-gate decision document.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExitKind;

pub const GATE_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    PromoteReady,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PromoteReady => f.write_str("promote_ready"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    GatePassed,
    DigestMismatch,
    SmokeFailed,
    PreconditionInvalid,
}

impl DecisionReason {
    /// The decision implied by this reason. Only an explicit pass promotes.
    #[must_use]
    pub const fn decision(self) -> Decision {
        match self {
            Self::GatePassed => Decision::PromoteReady,
            Self::DigestMismatch | Self::SmokeFailed | Self::PreconditionInvalid => {
                Decision::Abort
            }
        }
    }

    #[must_use]
    pub const fn exit_kind(self) -> ExitKind {
        match self {
            Self::GatePassed => ExitKind::Success,
            Self::DigestMismatch => ExitKind::Detected,
            Self::SmokeFailed => ExitKind::ActionFailed,
            Self::PreconditionInvalid => ExitKind::Precondition,
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::GatePassed => "gate_passed",
            Self::DigestMismatch => "digest_mismatch",
            Self::SmokeFailed => "smoke_failed",
            Self::PreconditionInvalid => "precondition_invalid",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackHints {
    pub runbook: String,
    pub steps: Vec<String>,
}

/// Bounded excerpt of a smoke run kept in the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeSummary {
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// The persisted gate decision. `<run_id>.json` and `latest.json` carry
/// byte-identical copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateArtifact {
    pub schema_version: String,
    pub run_id: String,
    pub decision: Decision,
    pub reason: DecisionReason,
    pub digest_match: bool,
    pub smoke_exit_code: Option<i32>,
    pub candidate_digest: String,
    pub approved_digest: String,
    pub smoke_command: String,
    pub started_at_utc: String,
    pub ended_at_utc: String,
    pub rollback_hints: Option<RollbackHints>,
    pub smoke: Option<SmokeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GateArtifact {
    #[must_use]
    pub const fn exit_kind(&self) -> ExitKind {
        self.reason.exit_kind()
    }

    /// Markdown rendering written next to the JSON document.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Staging-lite promote gate: {}", self.run_id),
            String::new(),
            format!("- Decision: **{}**", self.decision),
            format!("- Reason: `{}`", self.reason),
            format!("- Candidate digest: `{}`", self.candidate_digest),
            format!("- Approved digest: `{}`", self.approved_digest),
            format!("- Digest match: `{}`", self.digest_match),
            format!("- Smoke command: `{}`", self.smoke_command),
            format!(
                "- Smoke exit code: `{}`",
                self.smoke_exit_code
                    .map_or_else(|| "null".to_string(), |code| code.to_string())
            ),
            format!("- Started: `{}`", self.started_at_utc),
            format!("- Ended: `{}`", self.ended_at_utc),
        ];
        if let Some(detail) = &self.detail {
            lines.push(format!("- Detail: {detail}"));
        }
        if let Some(hints) = &self.rollback_hints {
            lines.push(String::new());
            lines.push("## Abort / rollback".to_string());
            lines.push(format!("- Runbook: `{}`", hints.runbook));
            for (idx, step) in hints.steps.iter().enumerate() {
                lines.push(format!("{}. {step}", idx + 1));
            }
        }
        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gate_passed_promotes() {
        assert_eq!(DecisionReason::GatePassed.decision(), Decision::PromoteReady);
        for reason in [
            DecisionReason::DigestMismatch,
            DecisionReason::SmokeFailed,
            DecisionReason::PreconditionInvalid,
        ] {
            assert_eq!(reason.decision(), Decision::Abort);
        }
    }

    #[test]
    fn reasons_map_to_exit_contract() {
        assert_eq!(DecisionReason::GatePassed.exit_kind().code(), 0);
        assert_eq!(DecisionReason::DigestMismatch.exit_kind().code(), 10);
        assert_eq!(DecisionReason::SmokeFailed.exit_kind().code(), 20);
        assert_eq!(DecisionReason::PreconditionInvalid.exit_kind().code(), 2);
    }

    #[test]
    fn serializes_snake_case_tags() {
        let json = serde_json::to_value(DecisionReason::DigestMismatch).expect("json");
        assert_eq!(json, "digest_mismatch");
        let json = serde_json::to_value(Decision::PromoteReady).expect("json");
        assert_eq!(json, "promote_ready");
    }
}
