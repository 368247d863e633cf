//! Smoke command execution for the promote gate.

use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::model::SmokeSummary;
use crate::process::{self, ProcessError};

/// Upper bound for captured stdout/stderr, in bytes.
pub const OUTPUT_LIMIT: usize = 4096;

/// Exit code reported for a smoke command killed by the timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Outcome of one smoke run. A non-zero exit is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeResult {
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SmokeResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    #[must_use]
    pub fn summary(&self) -> SmokeSummary {
        SmokeSummary {
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            duration_ms: self.duration_ms,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
        }
    }
}

pub trait SmokeRunner {
    /// Execute `command` with a bounded runtime.
    ///
    /// # Errors
    ///
    /// Only a failure to start the command is an error.
    fn run(&self, command: &str, timeout: Duration) -> Result<SmokeResult, ProcessError>;
}

/// Runs the command string through `sh -c`.
pub struct ShellSmokeRunner<'a> {
    clock: &'a dyn Clock,
}

impl<'a> ShellSmokeRunner<'a> {
    #[must_use]
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self { clock }
    }
}

impl SmokeRunner for ShellSmokeRunner<'_> {
    fn run(&self, command: &str, timeout: Duration) -> Result<SmokeResult, ProcessError> {
        let started_at = self.clock.now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        let output = process::run_with_timeout(&mut cmd, timeout)?;
        let ended_at = self.clock.now();

        let (stdout, stdout_truncated) = truncate_output(&output.stdout_lossy(), OUTPUT_LIMIT);
        let (stderr, stderr_truncated) = truncate_output(&output.stderr_lossy(), OUTPUT_LIMIT);
        let exit_code = if output.timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            output.exit_code
        };
        tracing::debug!(
            exit_code,
            timed_out = output.timed_out,
            duration_ms = output.duration.as_millis(),
            "smoke command finished"
        );

        Ok(SmokeResult {
            exit_code,
            timed_out: output.timed_out,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
            started_at,
            ended_at,
        })
    }
}

/// Cut `text` to at most `limit` bytes without splitting a character.
#[must_use]
pub fn truncate_output(text: &str, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text.to_string(), false);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}
