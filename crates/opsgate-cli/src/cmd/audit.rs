use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use opsgate_core::OpsError;
use opsgate_core::audit_source::{CloudAuditSource, FileAuditSource};
use opsgate_core::legacy_audit::{LOOKBACK_VARIABLE, LegacyAudit, LegacyAuditReport, parse_lookback};
use tracing::info;

use super::{Context, Outcome, RunArgs, prepare_summary};
use crate::aws::{AwsCliAuditSource, DEFAULT_AWS_PROGRAM};
use crate::output::{pretty_kv, pretty_section, render_mode};

/// Arguments for `opsgate audit-legacy`.
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Window size in hours (overrides `LOOKBACK_HOURS`).
    #[arg(long, value_name = "HOURS", allow_hyphen_values = true)]
    pub lookback_hours: Option<String>,

    /// Keep the audit's own `LookupEvents` calls in the analysis.
    #[arg(long)]
    pub include_lookup_events: bool,

    /// Restrict to one principal (overrides `LEGACY_USER`).
    #[arg(long, value_name = "USER")]
    pub legacy_user: Option<String>,

    /// AWS region (overrides `AWS_REGION`).
    #[arg(long)]
    pub region: Option<String>,

    /// Replay events from a file instead of calling CloudTrail.
    #[arg(long, value_name = "PATH")]
    pub events_file: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Execute `opsgate audit-legacy`.
///
/// # Errors
///
/// An unusable lookback window, a failed lookup, or an artifact problem.
pub fn run_audit(args: &AuditArgs, ctx: &Context<'_>) -> anyhow::Result<Outcome> {
    let mut config = ctx.config.audit.clone();
    let raw_lookback = args
        .lookback_hours
        .clone()
        .or_else(|| ctx.env.get(LOOKBACK_VARIABLE));
    if let Some(raw) = raw_lookback {
        config.lookback_hours = parse_lookback(&raw)?;
    }
    if args.include_lookup_events {
        config.include_lookup_events = true;
    }
    if let Some(user) = &args.legacy_user {
        config.legacy_user = Some(user.clone());
    }
    if let Some(region) = &args.region {
        config.region = Some(region.clone());
    }
    let run_id = args.run.run_id(ctx.clock)?;
    let writer = args.run.summary_writer();
    prepare_summary(writer.as_ref(), &run_id)?;

    let source: Box<dyn CloudAuditSource> = match &args.events_file {
        Some(path) => {
            info!(path = %path.display(), "replaying audit events from file");
            Box::new(FileAuditSource::new(path))
        }
        None => {
            let program = ctx
                .env
                .get("AWS_CLI")
                .unwrap_or_else(|| DEFAULT_AWS_PROGRAM.to_string());
            let timeout = Duration::from_secs(ctx.config.backend.http_timeout_secs.max(1));
            info!(program = %program, region = ?config.region, "querying cloudtrail");
            Box::new(AwsCliAuditSource::new(program, &config, timeout))
        }
    };

    let report = LegacyAudit {
        source: source.as_ref(),
        clock: ctx.clock,
        config: &config,
    }
    .run()?;

    if let Some(writer) = &writer {
        writer
            .write(&run_id, &report, Some(&report.to_text()))
            .map_err(OpsError::from)?;
    }
    render_mode(
        ctx.output,
        &report,
        |report, w| w.write_all(report.to_text().as_bytes()),
        write_pretty,
    )?;
    Ok(Outcome::new(report.exit_kind(), summary_line(&report)))
}

fn summary_line(report: &LegacyAuditReport) -> String {
    if report.events_analyzed == 0 {
        return format!(
            "no legacy events in the last {}h",
            report.window.lookback_hours
        );
    }
    format!(
        "{} legacy event(s) from {} fingerprint(s) in the last {}h",
        report.events_analyzed, report.fingerprints_total, report.window.lookback_hours
    )
}

fn write_pretty(report: &LegacyAuditReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "CloudTrail legacy-consumer audit")?;
    pretty_kv(
        w,
        "window",
        format!("{} .. {}", report.window.start_utc, report.window.end_utc),
    )?;
    pretty_kv(w, "principal", report.principal.as_deref().unwrap_or("(any)"))?;
    pretty_kv(w, "events raw", report.events_raw.to_string())?;
    pretty_kv(w, "analyzed", report.events_analyzed.to_string())?;
    pretty_kv(w, "self filtered", report.lookup_events_filtered.to_string())?;
    if report.invalid_records > 0 {
        pretty_kv(w, "invalid", report.invalid_records.to_string())?;
    }
    writeln!(w)?;
    w.write_all(report.to_text().as_bytes())
}
