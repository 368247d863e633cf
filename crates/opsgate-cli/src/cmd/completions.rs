use std::io::{self, Write};

use clap::Args;
use clap_complete::{Shell, generate};

const BIN_NAME: &str = "opsgate";

/// Arguments for `opsgate completions`.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to emit the completion script for.
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Render the completion script for every `opsgate` subcommand into `out`.
///
/// # Errors
///
/// Any write failure on `out`.
pub fn write_completions(
    shell: Shell,
    command: &mut clap::Command,
    out: &mut dyn Write,
) -> io::Result<()> {
    let mut script = Vec::new();
    generate(shell, command, BIN_NAME, &mut script);
    out.write_all(&script)?;
    out.flush()
}

/// Execute `opsgate completions`; the script goes to stdout.
///
/// # Errors
///
/// Stdout is closed or unwritable.
pub fn run_completions(shell: Shell, command: &mut clap::Command) -> anyhow::Result<()> {
    write_completions(shell, command, &mut io::stdout().lock())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> clap::Command {
        clap::Command::new(BIN_NAME)
            .subcommand(clap::Command::new("promote-gate"))
            .subcommand(clap::Command::new("supervise-blockers"))
    }

    #[test]
    fn bash_script_names_binary_and_subcommands() {
        let mut buf = Vec::new();
        write_completions(Shell::Bash, &mut command(), &mut buf).expect("write");
        let script = String::from_utf8(buf).expect("utf8");
        assert!(script.contains("_opsgate"));
        assert!(script.contains("promote-gate"));
        assert!(script.contains("supervise-blockers"));
    }

    #[test]
    fn every_shell_produces_a_script() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            let mut buf = Vec::new();
            write_completions(shell, &mut command(), &mut buf).expect("write");
            assert!(!buf.is_empty(), "{shell} script is empty");
        }
    }
}
