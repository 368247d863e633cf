use std::io::{self, Write};

use clap::Args;
use opsgate_core::OpsError;
use opsgate_core::balance::{
    BalanceAuditor, BalanceMode, BalanceReport, Classifier, Remediation, Workstream,
};
use tracing::info;

use super::{Context, Outcome, RunArgs, prepare_summary};
use crate::github::GitHubClient;
use crate::output::render_mode;
use crate::settings::{require_repo, resolve_token};

/// Arguments for `opsgate audit-balance`.
#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// Repository as `owner/name` (overrides `GH_REPO`).
    #[arg(long, value_name = "OWNER/NAME")]
    pub repo: Option<String>,

    /// Print the tally only; never query or touch remediation items.
    #[arg(long, conflicts_with = "dry_run")]
    pub report_only: bool,

    /// Largest allowed difference between the busiest and idlest workstream.
    #[arg(long)]
    pub imbalance_gap: Option<u32>,

    #[command(flatten)]
    pub run: RunArgs,
}

impl BalanceArgs {
    const fn mode(&self) -> BalanceMode {
        if self.report_only {
            BalanceMode::ReportOnly
        } else if self.run.dry_run {
            BalanceMode::DryRun
        } else {
            BalanceMode::Apply
        }
    }
}

/// Execute `opsgate audit-balance`.
///
/// # Errors
///
/// Precondition errors (repo, config, run id) and any adapter failure.
pub fn run_balance(args: &BalanceArgs, ctx: &Context<'_>) -> anyhow::Result<Outcome> {
    let mut config = ctx.config.balance.clone();
    if let Some(gap) = args.imbalance_gap {
        config.imbalance_gap = gap;
    }
    let classifier = Classifier::from_config(&config).map_err(OpsError::from)?;
    let repo = require_repo(args.repo.as_deref(), ctx.env)?;
    let token = resolve_token(ctx.env)?;
    let run_id = args.run.run_id(ctx.clock)?;
    let writer = args.run.summary_writer();
    prepare_summary(writer.as_ref(), &run_id)?;

    let mode = args.mode();
    info!(repo = %repo.full_name(), gap = config.imbalance_gap, ?mode, "auditing workstream balance");
    let backend = GitHubClient::new(&ctx.config.backend, repo, token);
    let report = BalanceAuditor {
        backend: &backend,
        config: &config,
        classifier: &classifier,
        mode,
    }
    .run()?;

    if let Some(writer) = &writer {
        writer
            .write(&run_id, &report, Some(&report.to_markdown()))
            .map_err(OpsError::from)?;
    }
    render_mode(ctx.output, &report, write_text, |report, w| {
        w.write_all(report.to_markdown().as_bytes())?;
        writeln!(w)?;
        writeln!(w, "{}", remediation_line(&report.remediation))
    })?;
    Ok(Outcome::new(report.exit_kind(), summary_line(&report)))
}

fn summary_line(report: &BalanceReport) -> String {
    let state = if report.imbalanced {
        "imbalanced"
    } else {
        "balanced"
    };
    format!(
        "workstreams {state} ({}; spread {}, allowed {}); {}",
        report.tally.counts_line(),
        report.spread,
        report.imbalance_gap,
        remediation_line(&report.remediation)
    )
}

fn remediation_line(remediation: &Remediation) -> String {
    match remediation {
        Remediation::NotNeeded => "no remediation needed".to_string(),
        Remediation::Skipped => "remediation skipped (report only)".to_string(),
        Remediation::Created { number, url } => match number {
            Some(number) => format!("created remediation item #{number}: {url}"),
            None => format!("created remediation item #?: {url}"),
        },
        Remediation::WouldCreate => "would create a remediation item (dry-run)".to_string(),
        Remediation::AlreadyOpen { number } => {
            format!("remediation item #{number} already open")
        }
        Remediation::Closed { number } => format!("closed remediation item #{number}"),
        Remediation::WouldClose { number } => {
            format!("would close remediation item #{number} (dry-run)")
        }
    }
}

fn write_text(report: &BalanceReport, w: &mut dyn Write) -> io::Result<()> {
    for item in &report.items {
        let stream = item.workstream.map_or("unclassified", Workstream::as_str);
        writeln!(w, "#{} {stream} {}", item.number, item.title)?;
    }
    writeln!(w, "{}", summary_line(report))
}
