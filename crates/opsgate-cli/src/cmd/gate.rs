use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use opsgate_core::ExitKind;
use opsgate_core::artifact::ArtifactWriter;
use opsgate_core::gate::{GateOutcome, GateRequest, PromoteGate};
use opsgate_core::model::{Decision, DecisionReason};
use opsgate_core::smoke::ShellSmokeRunner;
use serde::Serialize;
use tracing::info;

use super::{Context, Outcome, RunArgs};
use crate::output::{OutputMode, pretty_kv, pretty_section};

/// Arguments for `opsgate promote-gate`.
#[derive(Args, Debug)]
pub struct GateArgs {
    /// Digest of the image about to be promoted.
    #[arg(long, value_name = "DIGEST")]
    pub candidate_digest: String,

    /// Digest that was approved for promotion.
    #[arg(long, value_name = "DIGEST")]
    pub approved_digest: String,

    /// Shell command that smoke-tests the candidate; exit 0 means pass.
    #[arg(long, value_name = "COMMAND")]
    pub smoke_command: String,

    /// Upper bound on the smoke command runtime.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub smoke_timeout_secs: Option<u64>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// One-line stdout summary of a gate run.
#[derive(Debug, Serialize)]
struct GateSummary {
    decision: Option<Decision>,
    reason: Option<DecisionReason>,
    digest_match: bool,
    exit_code: u8,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl GateSummary {
    fn from_outcome(outcome: &GateOutcome) -> Self {
        let exit_code = outcome.exit_kind().code();
        match outcome {
            GateOutcome::Decided { artifact, paths } => Self {
                decision: Some(artifact.decision),
                reason: Some(artifact.reason),
                digest_match: artifact.digest_match,
                exit_code,
                dry_run: false,
                artifact: Some(paths.run.clone()),
                latest: Some(paths.latest.clone()),
                detail: artifact.detail.clone(),
            },
            GateOutcome::DryRun {
                reason,
                digest_match,
                detail,
            } => Self {
                decision: reason.map(DecisionReason::decision),
                reason: *reason,
                digest_match: *digest_match,
                exit_code,
                dry_run: true,
                artifact: None,
                latest: None,
                detail: detail.clone(),
            },
        }
    }

    fn headline(&self) -> String {
        let verdict = match (self.dry_run, self.decision) {
            (true, None) => "WOULD RUN SMOKE",
            (_, Some(Decision::PromoteReady)) => "PASS",
            (_, _) => "ABORT",
        };
        let mut line = format!("staging-lite promote gate: {verdict}");
        if let Some(reason) = self.reason.filter(|r| *r != DecisionReason::GatePassed) {
            line.push_str(&format!(" ({reason})"));
        }
        if self.dry_run {
            line.push_str(" [dry-run]");
        }
        line
    }

    fn write(&self, w: &mut dyn Write, mode: OutputMode) -> anyhow::Result<()> {
        match mode {
            OutputMode::Json => {
                serde_json::to_writer(&mut *w, self)?;
                writeln!(w)?;
            }
            OutputMode::Text => writeln!(w, "{}", self.headline())?,
            OutputMode::Pretty => self.write_pretty(w)?,
        }
        Ok(())
    }

    fn write_pretty(&self, w: &mut dyn Write) -> io::Result<()> {
        pretty_section(w, &self.headline())?;
        pretty_kv(w, "digest match", self.digest_match.to_string())?;
        pretty_kv(w, "exit code", self.exit_code.to_string())?;
        if let Some(detail) = &self.detail {
            pretty_kv(w, "detail", detail)?;
        }
        if let Some(path) = &self.artifact {
            pretty_kv(w, "artifact", path.display().to_string())?;
        }
        if let Some(path) = &self.latest {
            pretty_kv(w, "latest", path.display().to_string())?;
        }
        Ok(())
    }
}

/// Execute `opsgate promote-gate`.
///
/// # Errors
///
/// Invalid run id, an existing run artifact, or an uncreatable artifact
/// directory (all before anything runs); failure to persist the decision.
pub fn run_gate(args: &GateArgs, ctx: &Context<'_>) -> anyhow::Result<Outcome> {
    let mut config = ctx.config.gate.clone();
    if let Some(secs) = args.smoke_timeout_secs {
        config.smoke_timeout_secs = secs;
    }
    let dir = args
        .run
        .artifact_dir
        .clone()
        .unwrap_or_else(|| config.artifact_dir.clone());
    let request = GateRequest {
        candidate_digest: args.candidate_digest.clone(),
        approved_digest: args.approved_digest.clone(),
        smoke_command: args.smoke_command.clone(),
        run_id: args.run.run_id(ctx.clock)?,
    };
    let writer = ArtifactWriter::new(dir);
    let runner = ShellSmokeRunner::new(ctx.clock);
    let gate = PromoteGate {
        clock: ctx.clock,
        runner: &runner,
        writer: &writer,
        config: &config,
    };

    info!(run_id = %request.run_id, dry_run = args.run.dry_run, "promote gate started");
    let outcome = if args.run.dry_run {
        gate.dry_run(&request)
    } else {
        gate.run(&request)?
    };

    let summary = GateSummary::from_outcome(&outcome);
    let stdout = io::stdout();
    summary.write(&mut stdout.lock(), ctx.output)?;

    let kind = outcome.exit_kind();
    let message = match &summary.detail {
        Some(detail) if kind != ExitKind::Success => format!("{}: {detail}", summary.headline()),
        _ => summary.headline(),
    };
    Ok(Outcome::new(kind, message))
}
