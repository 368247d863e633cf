//! Bounded subprocess execution.
//!
//! Output is redirected to anonymous temp files instead of pipes so a chatty
//! child cannot block on a full pipe while we poll for exit.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("failed to wait for `{program}`: {source}")]
    Wait { program: String, source: io::Error },

    #[error("failed to capture output of `{program}`: {source}")]
    Capture { program: String, source: io::Error },
}

/// Captured result of a finished (or killed) child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; on Unix a signal death is reported as `128 + signal`.
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl ProcessOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `command` to completion or until `timeout` elapses, then kill it.
///
/// stdin is closed. A timeout is not an error: it is reported through
/// [`ProcessOutput::timed_out`] together with whatever output was produced.
///
/// # Errors
///
/// Returns [`ProcessError`] when the child cannot be spawned, waited on, or
/// its output cannot be read back.
pub fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let capture_err = |source| ProcessError::Capture {
        program: program.clone(),
        source,
    };

    let mut stdout_file = tempfile::tempfile().map_err(capture_err)?;
    let mut stderr_file = tempfile::tempfile().map_err(capture_err)?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone().map_err(capture_err)?))
        .stderr(Stdio::from(stderr_file.try_clone().map_err(capture_err)?));

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                timed_out = true;
                tracing::warn!(
                    program = %program,
                    timeout_secs = timeout.as_secs(),
                    "killing child after timeout"
                );
                let _ = child.kill();
                break child.wait().map_err(|source| ProcessError::Wait {
                    program: program.clone(),
                    source,
                })?;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Err(ProcessError::Wait {
                    program: program.clone(),
                    source,
                });
            }
        }
    };
    let duration = started.elapsed();

    let stdout = read_back(&mut stdout_file).map_err(capture_err)?;
    let stderr = read_back(&mut stderr_file).map_err(capture_err)?;

    Ok(ProcessOutput {
        exit_code: exit_code(status),
        timed_out,
        stdout,
        stderr,
        duration,
    })
}

fn read_back(file: &mut File) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
