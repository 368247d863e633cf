#![forbid(unsafe_code)]

mod aws;
mod cmd;
mod github;
mod identity;
mod output;
mod settings;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use cmd::{Context, Outcome};
use opsgate_core::clock::{Clock, FixedClock, SystemClock};
use opsgate_core::config::ConfigError;
use opsgate_core::{AdapterError, ExitKind, OpsError};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use settings::RealEnv;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "opsgate: retry supervisor, balance auditor, promote gate, and legacy-credential audit",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging (logs the resolved configuration).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file; overrides `OPSGATE_CONFIG` and discovery.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output (alias for `--format json`).
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Pin the clock to an RFC 3339 instant.
    #[arg(long, global = true, hide = true, value_name = "RFC3339")]
    now: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Retry or escalate blocked work items",
        long_about = "Count failure comments on every blocked item, move items back to todo once the grace period has passed, and open one escalation item when the retry budget is spent.",
        after_help = "EXAMPLES:\n    # Supervise with identity and repo from the environment\n    BOT_IDENTITY=ops-bot GH_REPO=acme/geo-ranking opsgate supervise-blockers\n\n    # Preview decisions without touching the tracker\n    opsgate supervise-blockers --bot-identity ops-bot --repo acme/geo-ranking --dry-run\n\n    # Keep a JSON run summary\n    opsgate supervise-blockers --artifact-dir artifacts/supervisor"
    )]
    SuperviseBlockers(cmd::supervise::SuperviseArgs),

    #[command(
        about = "Audit open items for workstream balance",
        long_about = "Classify open items into development, documentation, and testing, and keep exactly one remediation item open while the spread exceeds the allowed gap.",
        after_help = "EXAMPLES:\n    # Audit and remediate\n    opsgate audit-balance --repo acme/geo-ranking\n\n    # Print the tally only\n    opsgate audit-balance --report-only --format json"
    )]
    AuditBalance(cmd::balance::BalanceArgs),

    #[command(
        about = "Fail-closed staging promotion gate",
        long_about = "Compare the candidate digest with the approved digest, run the smoke command, and persist the decision before exiting.",
        after_help = "EXAMPLES:\n    # Gate a candidate\n    opsgate promote-gate --candidate-digest sha256:ab12 --approved-digest sha256:ab12 --smoke-command ./scripts/smoke.sh\n\n    # Check inputs only\n    opsgate promote-gate --candidate-digest sha256:ab12 --approved-digest sha256:cd34 --smoke-command true --dry-run"
    )]
    PromoteGate(cmd::gate::GateArgs),

    #[command(
        about = "Find remaining consumers of a legacy credential",
        long_about = "Look up CloudTrail events in a recent window, drop the audit's own LookupEvents calls, and rank the remaining callers by fingerprint.",
        after_help = "EXAMPLES:\n    # Last 24 hours for one principal\n    LEGACY_USER=swisstopo-api-deploy opsgate audit-legacy\n\n    # Replay a saved lookup\n    opsgate audit-legacy --events-file events.json --lookback-hours 6"
    )]
    AuditLegacy(cmd::audit::AuditArgs),

    #[command(
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    opsgate completions bash > /etc/bash_completion.d/opsgate"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

impl Commands {
    /// Component name used as the stderr prefix.
    const fn component(&self) -> &'static str {
        match self {
            Self::SuperviseBlockers(_) => "supervise-blockers",
            Self::AuditBalance(_) => "audit-balance",
            Self::PromoteGate(_) => "promote-gate",
            Self::AuditLegacy(_) => "audit-legacy",
            Self::Completions(_) => "completions",
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("OPSGATE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "opsgate=debug,info"
        } else {
            "opsgate=info,warn"
        })
    });

    let format = env::var("OPSGATE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn exit_kind_of(err: &anyhow::Error) -> ExitKind {
    if let Some(ops) = err.downcast_ref::<OpsError>() {
        return ops.exit_kind();
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return ExitKind::Precondition;
    }
    if err.downcast_ref::<AdapterError>().is_some() {
        return ExitKind::Upstream;
    }
    ExitKind::Fatal
}

const fn error_code(kind: ExitKind) -> &'static str {
    match kind {
        ExitKind::Success => "ok",
        ExitKind::Fatal => "fatal",
        ExitKind::Precondition => "precondition",
        ExitKind::Detected => "detected",
        ExitKind::ActionFailed => "action_failed",
        ExitKind::Upstream => "upstream",
    }
}

fn suggestion_for(err: &anyhow::Error) -> Option<String> {
    match err.downcast_ref::<OpsError>()? {
        OpsError::Precondition { variable, .. } if variable == "BOT_IDENTITY" => {
            Some("pass --bot-identity or export BOT_IDENTITY".to_string())
        }
        OpsError::Precondition { variable, .. } if variable == "GH_REPO" => {
            Some("pass --repo owner/name or export GH_REPO".to_string())
        }
        OpsError::Config(_) => Some("check the config file or pass --config".to_string()),
        _ => None,
    }
}

fn build_clock(now: Option<&str>) -> Result<Box<dyn Clock>, OpsError> {
    match now {
        Some(raw) => FixedClock::parse(raw)
            .map(|clock| Box::new(clock) as Box<dyn Clock>)
            .ok_or_else(|| {
                OpsError::precondition("--now", format!("invalid RFC 3339 timestamp {raw:?}"))
            }),
        None => Ok(Box::new(SystemClock)),
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<Outcome> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        cmd::completions::run_completions(args.shell, &mut command)?;
        return Ok(Outcome::new(ExitKind::Success, String::new()));
    }

    let env = RealEnv;
    let (config, source) = settings::load_config(cli.config.as_deref(), &env)?;
    if cli.verbose {
        debug!(source = ?source, config = ?config, "resolved configuration");
    }
    let clock = build_clock(cli.now.as_deref())?;
    let ctx = Context {
        config: &config,
        clock: clock.as_ref(),
        env: &env,
        output,
    };

    match &cli.command {
        Commands::SuperviseBlockers(args) => cmd::supervise::run_supervise(args, &ctx),
        Commands::AuditBalance(args) => cmd::balance::run_balance(args, &ctx),
        Commands::PromoteGate(args) => cmd::gate::run_gate(args, &ctx),
        Commands::AuditLegacy(args) => cmd::audit::run_audit(args, &ctx),
        Commands::Completions(_) => Ok(Outcome::new(ExitKind::Success, String::new())),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = resolve_output_mode(cli.format, cli.json);
    let component = cli.command.component();

    match run(&cli, output) {
        Ok(outcome) => {
            if !outcome.kind.is_success() {
                eprintln!("{component}: error: {}", outcome.summary);
            }
            ExitCode::from(outcome.kind.code())
        }
        Err(err) => {
            let kind = exit_kind_of(&err);
            debug!(component, exit_code = kind.code(), error = ?err, "command failed");
            let error = CliError {
                component: component.to_string(),
                message: format!("{err:#}"),
                exit_code: kind.code(),
                error_code: error_code(kind).to_string(),
                suggestion: suggestion_for(&err),
            };
            if render_error(output, &error).is_err() {
                eprintln!("{component}: error: {err:#}");
            }
            ExitCode::from(kind.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from([
            "opsgate",
            "audit-legacy",
            "--json",
            "--now",
            "2026-02-26T20:00:00Z",
        ]);
        assert!(cli.json);
        assert_eq!(cli.now.as_deref(), Some("2026-02-26T20:00:00Z"));
        assert!(matches!(cli.command, Commands::AuditLegacy(_)));
    }

    #[test]
    fn format_flag_parses() {
        let cli = Cli::parse_from(["opsgate", "--format", "text", "audit-balance", "--report-only"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
        match cli.command {
            Commands::AuditBalance(args) => assert!(args.report_only),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn gate_requires_all_three_inputs() {
        let result = Cli::try_parse_from([
            "opsgate",
            "promote-gate",
            "--candidate-digest",
            "sha256:a",
            "--approved-digest",
            "sha256:a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn gate_accepts_empty_digest_values() {
        let cli = Cli::parse_from([
            "opsgate",
            "promote-gate",
            "--candidate-digest",
            "",
            "--approved-digest",
            "sha256:a",
            "--smoke-command",
            "true",
        ]);
        match cli.command {
            Commands::PromoteGate(args) => assert!(args.candidate_digest.is_empty()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn report_only_conflicts_with_dry_run() {
        let result = Cli::try_parse_from(["opsgate", "audit-balance", "--report-only", "--dry-run"]);
        assert!(result.is_err());
    }

    #[test]
    fn max_fails_must_be_positive() {
        let result = Cli::try_parse_from(["opsgate", "supervise-blockers", "--max-fails", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["opsgate", "supervise-blockers"],
            vec!["opsgate", "audit-balance"],
            vec![
                "opsgate",
                "promote-gate",
                "--candidate-digest",
                "a",
                "--approved-digest",
                "a",
                "--smoke-command",
                "true",
            ],
            vec!["opsgate", "audit-legacy", "--lookback-hours", "6"],
            vec!["opsgate", "completions", "bash"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "failed to parse {args:?}: {:?}", result.err());
        }
    }

    #[test]
    fn components_match_subcommand_names() {
        let cli = Cli::parse_from(["opsgate", "supervise-blockers"]);
        assert_eq!(cli.command.component(), "supervise-blockers");
    }

    #[test]
    fn errors_map_to_exit_kinds() {
        let pre: anyhow::Error = OpsError::precondition("GH_REPO", "missing").into();
        assert_eq!(exit_kind_of(&pre), ExitKind::Precondition);
        assert!(suggestion_for(&pre).is_some());

        let upstream: anyhow::Error = AdapterError::transport("issues:list", "reset").into();
        assert_eq!(exit_kind_of(&upstream), ExitKind::Upstream);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_kind_of(&other), ExitKind::Fatal);
    }

    #[test]
    fn now_flag_pins_clock() {
        let clock = build_clock(Some("2026-02-26T20:00:00Z")).expect("clock");
        assert_eq!(
            opsgate_core::clock::format_utc(clock.now()),
            "2026-02-26T20:00:00Z"
        );
        let err = build_clock(Some("tomorrow")).err().expect("invalid");
        assert_eq!(err.exit_kind(), ExitKind::Precondition);
    }
}
