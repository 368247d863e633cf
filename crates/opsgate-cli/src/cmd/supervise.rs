use std::io::{self, Write};

use clap::Args;
use opsgate_core::OpsError;
use opsgate_core::supervisor::{Supervisor, SupervisorAction, SupervisorReport};
use tracing::info;

use super::{Context, Outcome, RunArgs, prepare_summary};
use crate::github::GitHubClient;
use crate::identity::require_identity;
use crate::output::{pretty_kv, pretty_section, render_mode};
use crate::settings::{require_repo, resolve_token};

/// Arguments for `opsgate supervise-blockers`.
#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Login the supervisor comments as (overrides `BOT_IDENTITY`).
    #[arg(long, value_name = "LOGIN")]
    pub bot_identity: Option<String>,

    /// Repository as `owner/name` (overrides `GH_REPO`).
    #[arg(long, value_name = "OWNER/NAME")]
    pub repo: Option<String>,

    /// Hours after the last failure before an item is acted on.
    #[arg(long)]
    pub grace_hours: Option<u32>,

    /// Failure count that triggers escalation.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_fails: Option<u32>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Execute `opsgate supervise-blockers`.
///
/// # Errors
///
/// Precondition errors (identity, repo, config, run id) and a failed
/// listing of blocked items.
pub fn run_supervise(args: &SuperviseArgs, ctx: &Context<'_>) -> anyhow::Result<Outcome> {
    let mut config = ctx.config.supervisor.clone();
    if let Some(hours) = args.grace_hours {
        config.grace_hours = hours;
    }
    if let Some(max) = args.max_fails {
        config.max_fails = max;
    }
    let rules = config.compile().map_err(OpsError::from)?;
    let identity = require_identity(args.bot_identity.as_deref(), config.identity_match, ctx.env)?;
    let repo = require_repo(args.repo.as_deref(), ctx.env)?;
    let token = resolve_token(ctx.env)?;
    let run_id = args.run.run_id(ctx.clock)?;
    let writer = args.run.summary_writer();
    prepare_summary(writer.as_ref(), &run_id)?;

    info!(
        repo = %repo.full_name(),
        identity = %identity.login,
        grace_hours = config.grace_hours,
        max_fails = config.max_fails,
        dry_run = args.run.dry_run,
        "supervising blocked items"
    );
    let backend = GitHubClient::new(&ctx.config.backend, repo, token);
    let report = Supervisor {
        backend: &backend,
        clock: ctx.clock,
        identity: &identity,
        config: &config,
        rules: &rules,
        dry_run: args.run.dry_run,
    }
    .run()?;

    if let Some(writer) = &writer {
        writer.write(&run_id, &report, None).map_err(OpsError::from)?;
    }
    render_mode(ctx.output, &report, write_text, write_pretty)?;
    Ok(Outcome::new(report.exit_kind(), summary_line(&report)))
}

fn summary_line(report: &SupervisorReport) -> String {
    format!(
        "processed {} blocked item(s): {} retried, {} escalated, {} errored",
        report.processed,
        report.count(SupervisorAction::Retried),
        report.count(SupervisorAction::Escalated),
        report.errored
    )
}

fn write_text(report: &SupervisorReport, w: &mut dyn Write) -> io::Result<()> {
    for item in &report.items {
        write!(w, "#{} {} failures={}", item.number, item.action.as_str(), item.failures)?;
        if let Some(child) = item.child_number {
            write!(w, " child=#{child}")?;
        }
        if item.dry_run {
            write!(w, " (dry-run)")?;
        }
        if let Some(error) = &item.error {
            write!(w, " error={error}")?;
        }
        writeln!(w)?;
    }
    writeln!(w, "{}", summary_line(report))
}

fn write_pretty(report: &SupervisorReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Blocker retry supervisor")?;
    pretty_kv(w, "started", &report.started_at_utc)?;
    pretty_kv(w, "grace hours", report.grace_hours.to_string())?;
    pretty_kv(w, "max fails", report.max_fails.to_string())?;
    if report.dry_run {
        pretty_kv(w, "mode", "dry-run")?;
    }
    writeln!(w)?;
    for item in &report.items {
        writeln!(w, "#{} {}", item.number, item.title)?;
        pretty_kv(w, "  action", item.action.as_str())?;
        pretty_kv(w, "  failures", item.failures.to_string())?;
        if let Some(last) = &item.last_failure {
            pretty_kv(w, "  last failure", last)?;
        }
        if let Some(url) = &item.child_url {
            pretty_kv(w, "  follow-up", url)?;
        }
        if let Some(error) = &item.error {
            pretty_kv(w, "  error", error)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{}", summary_line(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgate_core::supervisor::ItemReport;

    fn report() -> SupervisorReport {
        SupervisorReport {
            started_at_utc: "2026-02-26T20:00:00Z".into(),
            grace_hours: 3,
            max_fails: 3,
            dry_run: false,
            processed: 2,
            errored: 0,
            items: vec![
                ItemReport {
                    number: 4,
                    title: "Crawler blocked".into(),
                    failures: 3,
                    last_failure: Some("2026-02-26T12:00:00Z".into()),
                    action: SupervisorAction::Escalated,
                    child_number: Some(12),
                    child_url: Some("https://github.com/acme/repo/issues/12".into()),
                    dry_run: false,
                    error: None,
                },
                ItemReport {
                    number: 5,
                    title: "Flaky deploy".into(),
                    failures: 1,
                    last_failure: Some("2026-02-26T19:00:00Z".into()),
                    action: SupervisorAction::WithinGrace,
                    child_number: None,
                    child_url: None,
                    dry_run: false,
                    error: None,
                },
            ],
        }
    }

    #[test]
    fn text_lists_one_line_per_item() {
        let mut buf = Vec::new();
        write_text(&report(), &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#4 escalated failures=3 child=#12");
        assert_eq!(lines[1], "#5 within_grace failures=1");
        assert_eq!(
            lines[2],
            "processed 2 blocked item(s): 0 retried, 1 escalated, 0 errored"
        );
    }

    #[test]
    fn pretty_shows_follow_up_url() {
        let mut buf = Vec::new();
        write_pretty(&report(), &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("https://github.com/acme/repo/issues/12"));
    }
}
