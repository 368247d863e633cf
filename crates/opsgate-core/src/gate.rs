//! Staging-lite promote gate.
//!
//! Fail-closed: digest equality first, then the smoke command. Anything but
//! an explicit pass aborts, and every decision is persisted before the
//! caller sees it.

use std::time::Duration;

use tracing::{info, warn};

use crate::artifact::{ArtifactPaths, ArtifactWriter, RunId};
use crate::clock::{Clock, format_utc};
use crate::config::GateConfig;
use crate::error::{ExitKind, OpsError};
use crate::model::{DecisionReason, GATE_SCHEMA_VERSION, GateArtifact, RollbackHints};
use crate::smoke::{SmokeResult, SmokeRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRequest {
    pub candidate_digest: String,
    pub approved_digest: String,
    pub smoke_command: String,
    pub run_id: RunId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Decided {
        artifact: Box<GateArtifact>,
        paths: ArtifactPaths,
    },
    /// Preconditions and digests checked; nothing executed or written.
    /// `reason` is `None` when the smoke command would run.
    DryRun {
        reason: Option<DecisionReason>,
        digest_match: bool,
        detail: Option<String>,
    },
}

impl GateOutcome {
    #[must_use]
    pub fn exit_kind(&self) -> ExitKind {
        match self {
            Self::Decided { artifact, .. } => artifact.exit_kind(),
            Self::DryRun { reason, .. } => reason.map_or(ExitKind::Success, DecisionReason::exit_kind),
        }
    }
}

pub struct PromoteGate<'a> {
    pub clock: &'a dyn Clock,
    pub runner: &'a dyn SmokeRunner,
    pub writer: &'a ArtifactWriter,
    pub config: &'a GateConfig,
}

impl PromoteGate<'_> {
    /// Decide and persist.
    ///
    /// # Errors
    ///
    /// A run id that was already written or an artifact directory that
    /// cannot be created is a precondition error, raised before anything
    /// runs. Failing to persist the decision afterwards is fatal.
    pub fn run(&self, request: &GateRequest) -> Result<GateOutcome, OpsError> {
        self.writer.prepare(&request.run_id)?;
        let started_at = self.clock.now();

        let digest_match = request.candidate_digest == request.approved_digest;
        let (reason, smoke, detail) = if let Some(problem) = precondition_problem(request) {
            warn!(problem = %problem, "precondition invalid");
            (DecisionReason::PreconditionInvalid, None, Some(problem))
        } else if !digest_match {
            info!(
                candidate = %request.candidate_digest,
                approved = %request.approved_digest,
                "digest mismatch; smoke skipped"
            );
            (DecisionReason::DigestMismatch, None, None)
        } else {
            self.smoke(request)
        };

        let ended_at = self.clock.now();
        let rollback_hints = (reason == DecisionReason::SmokeFailed).then(|| RollbackHints {
            runbook: self.config.runbook.clone(),
            steps: self.config.rollback_steps.clone(),
        });
        let artifact = GateArtifact {
            schema_version: GATE_SCHEMA_VERSION.to_string(),
            run_id: request.run_id.to_string(),
            decision: reason.decision(),
            reason,
            digest_match,
            smoke_exit_code: smoke.as_ref().map(|s| s.exit_code),
            candidate_digest: request.candidate_digest.clone(),
            approved_digest: request.approved_digest.clone(),
            smoke_command: request.smoke_command.clone(),
            started_at_utc: format_utc(started_at),
            ended_at_utc: format_utc(ended_at),
            rollback_hints,
            smoke: smoke.as_ref().map(SmokeResult::summary),
            detail,
        };

        let paths = self
            .writer
            .write(&request.run_id, &artifact, Some(&artifact.to_markdown()))
            .map_err(|err| OpsError::Fatal(format!("decision not persisted: {err}")))?;
        info!(decision = %artifact.decision, reason = %artifact.reason, "gate decided");
        Ok(GateOutcome::Decided {
            artifact: Box::new(artifact),
            paths,
        })
    }

    /// Check preconditions and digests without running or writing anything.
    #[must_use]
    pub fn dry_run(&self, request: &GateRequest) -> GateOutcome {
        let digest_match = request.candidate_digest == request.approved_digest;
        if let Some(problem) = precondition_problem(request) {
            return GateOutcome::DryRun {
                reason: Some(DecisionReason::PreconditionInvalid),
                digest_match,
                detail: Some(problem),
            };
        }
        let reason = (!digest_match).then_some(DecisionReason::DigestMismatch);
        GateOutcome::DryRun {
            reason,
            digest_match,
            detail: None,
        }
    }

    fn smoke(&self, request: &GateRequest) -> (DecisionReason, Option<SmokeResult>, Option<String>) {
        let timeout = Duration::from_secs(self.config.smoke_timeout_secs);
        match self.runner.run(&request.smoke_command, timeout) {
            Ok(result) if result.passed() => (DecisionReason::GatePassed, Some(result), None),
            Ok(result) => {
                let detail = if result.timed_out {
                    format!("smoke command timed out after {}s", timeout.as_secs())
                } else {
                    format!("smoke command exited with {}", result.exit_code)
                };
                warn!(exit_code = result.exit_code, timed_out = result.timed_out, "smoke failed");
                (DecisionReason::SmokeFailed, Some(result), Some(detail))
            }
            Err(err) => {
                warn!(error = %err, "smoke command could not be started");
                (
                    DecisionReason::PreconditionInvalid,
                    None,
                    Some(format!("smoke command could not be started: {err}")),
                )
            }
        }
    }
}

fn precondition_problem(request: &GateRequest) -> Option<String> {
    if request.candidate_digest.trim().is_empty() {
        return Some("candidate digest is empty".to_string());
    }
    if request.approved_digest.trim().is_empty() {
        return Some("approved digest is empty".to_string());
    }
    if request.smoke_command.trim().is_empty() {
        return Some("smoke command is empty".to_string());
    }
    None
}
