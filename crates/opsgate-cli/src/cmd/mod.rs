pub mod audit;
pub mod balance;
pub mod completions;
pub mod gate;
pub mod supervise;

use std::path::PathBuf;

use clap::Args;
use opsgate_core::artifact::{ArtifactWriter, RunId};
use opsgate_core::clock::{Clock, run_stamp};
use opsgate_core::config::OpsConfig;
use opsgate_core::{ExitKind, OpsError};

use crate::output::OutputMode;
use crate::settings::EnvReader;

/// Everything a command handler needs besides its own arguments.
pub struct Context<'a> {
    pub config: &'a OpsConfig,
    pub clock: &'a dyn Clock,
    pub env: &'a dyn EnvReader,
    pub output: OutputMode,
}

/// Result of a command that ran to completion.
///
/// A non-success `kind` is a domain outcome (detected, action failed), not
/// an error; `summary` is the one-line stderr explanation.
#[derive(Debug)]
pub struct Outcome {
    pub kind: ExitKind,
    pub summary: String,
}

impl Outcome {
    pub fn new(kind: ExitKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
        }
    }
}

/// Flags shared by every batch component.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory for run artifacts (`<run-id>.json` and `latest.json`).
    #[arg(long, value_name = "DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Run identifier; defaults to the UTC start time (`%Y%m%dT%H%M%SZ`).
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Compute every decision but change nothing.
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// The validated run id.
    pub fn run_id(&self, clock: &dyn Clock) -> Result<RunId, OpsError> {
        match &self.run_id {
            Some(raw) => RunId::new(raw),
            None => RunId::new(&run_stamp(clock.now())),
        }
    }

    /// Artifact writer for summary reports, or `None` when no directory was
    /// given or this is a dry run.
    pub fn summary_writer(&self) -> Option<ArtifactWriter> {
        if self.dry_run {
            return None;
        }
        self.artifact_dir.clone().map(ArtifactWriter::new)
    }
}

/// Prepare the summary artifact slot before any side effect happens.
pub fn prepare_summary(
    writer: Option<&ArtifactWriter>,
    run_id: &RunId,
) -> Result<(), OpsError> {
    if let Some(writer) = writer {
        writer.prepare(run_id)?;
    }
    Ok(())
}
