//! Report rendering for every subcommand.
//!
//! Reports are written to stdout. Logs and error lines are written to stderr,
//! so a JSON report can be piped straight into another tool.
//!
//! The mode comes from `--format` (or the hidden `--json`), then
//! `OPSGATE_FORMAT`, then the terminal: pretty on a TTY, text otherwise.

use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const HEADING_RULE: usize = 72;
const KEY_COLUMN: usize = 16;

/// Heading line plus a dashed rule.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    writeln!(w, "{}", "-".repeat(HEADING_RULE))
}

/// `key:` padded to a fixed column, then the value.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    let label = format!("{key}:");
    writeln!(w, "{label:<KEY_COLUMN$} {}", value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Sectioned output for people at a terminal.
    Pretty,
    /// Flat lines for CI logs.
    Text,
    /// JSON documents for other tools.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Parse an `OPSGATE_FORMAT` value; unknown values are ignored.
    fn from_env_value(raw: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).ok()
    }

    fn pick(flag: Option<Self>, json_flag: bool, env_value: Option<&str>, tty: bool) -> Self {
        flag.or_else(|| json_flag.then_some(Self::Json))
            .or_else(|| env_value.and_then(Self::from_env_value))
            .unwrap_or(if tty { Self::Pretty } else { Self::Text })
    }
}

/// Choose the output mode for this process.
pub fn resolve_output_mode(flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_value = std::env::var("OPSGATE_FORMAT").ok();
    OutputMode::pick(
        flag,
        json_flag,
        env_value.as_deref(),
        io::stdout().is_terminal(),
    )
}

/// Write `report` to stdout in `mode`. JSON is pretty-printed; the other
/// two modes delegate to the command's renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    report: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    if mode.is_json() {
        serde_json::to_writer_pretty(&mut out, report)?;
        writeln!(out)?;
    } else if mode == OutputMode::Text {
        text_fn(report, &mut out)?;
    } else {
        pretty_fn(report, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// A command failure as reported to the operator.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Subcommand name, used as the stderr prefix.
    pub component: String,
    pub message: String,
    pub exit_code: u8,
    /// Exit class name: `precondition`, `upstream`, ...
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// `<component>: error: <message>`, then an optional suggestion line.
pub fn write_error_line(w: &mut dyn Write, error: &CliError) -> io::Result<()> {
    writeln!(w, "{}: error: {}", error.component, error.message)?;
    match &error.suggestion {
        Some(hint) => writeln!(w, "  suggestion: {hint}"),
        None => Ok(()),
    }
}

/// `{"error": {...}}` on a single line.
pub fn write_error_json(w: &mut dyn Write, error: &CliError) -> anyhow::Result<()> {
    let line = serde_json::to_string(&serde_json::json!({ "error": error }))?;
    writeln!(w, "{line}")?;
    Ok(())
}

/// The stderr line is always written; JSON mode also puts the structured
/// error on stdout.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    write_error_line(&mut io::stderr().lock(), error)?;
    if mode.is_json() {
        write_error_json(&mut io::stdout().lock(), error)?;
    }
    Ok(())
}
