use crate::config::Redirect;
use anyhow::{anyhow, Context};
use std::{fs::OpenOptions, time::Duration};
use tracing::debug;
use subprocess::{Exec, NullFile, Redirection};

/// Runs the given command as a detached process. This function does not block
/// because the process is managed by the OS and running separately from this
/// thread.
///
/// # Arguments
///
/// * command - The command to run.
///
/// # Returns
///
/// The PID returned by the operating system
pub fn run_command_detached(command: &str, redirect: Option<Redirect>) -> anyhow::Result<u32> {
    let redirect = redirect.unwrap_or(Redirect::File);

    // break command string into POSIX words
    let words = shlex::split(command)
        .ok_or_else(|| anyhow!("Command string is not POSIX compliant: {}", command))?;

    // split command string into command and args
    match &words[..] {
        [command, args @ ..] => {
            debug!("running command {} in detached mode", command);
            let exec = Exec::cmd(command).args(args);

            let exec = match redirect {
                Redirect::Null => exec.stdout(NullFile).stderr(NullFile),
                Redirect::Parent => exec,
                Redirect::File => {
                    let out_file = OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open("./.stdout")?;
                    let err_file = OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open("./.stderr")?;
                    exec.stdout(Redirection::File(out_file))
                        .stderr(Redirection::File(err_file))
                }
            };

            exec.detached()
                .popen()
                .context(format!(
                    "Failed to spawn detached process, command: {}",
                    command
                ))?
                .pid()
                .context("Process should have a PID")
        }
        _ => Err(anyhow!("Empty command")),
    }
}

/// The observable result of a bounded foreground command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Success,
    Failure(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            CommandOutcome::Success => None,
            CommandOutcome::Failure(detail) => Some(detail),
        }
    }
}

/// Runs a command to completion with a hard time limit. Never hangs: an
/// overrunning child is killed on drop and reported as a failure, as are
/// spawn errors (e.g. the binary is not installed).
pub async fn run_command(command: &str, limit: Duration) -> CommandOutcome {
    let words = match shlex::split(command) {
        Some(words) if !words.is_empty() => words,
        _ => {
            return CommandOutcome::Failure(format!(
                "command string is not POSIX compliant: {}",
                command
            ))
        }
    };

    let (program, args) = (&words[0], &words[1..]);
    let output = tokio::time::timeout(
        limit,
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Err(_) => CommandOutcome::Failure(format!(
            "command timed out after {}s: {}",
            limit.as_secs(),
            command
        )),
        Ok(Err(err)) => CommandOutcome::Failure(format!("failed to run {}: {}", command, err)),
        Ok(Ok(output)) => {
            if output.status.success() {
                CommandOutcome::Success
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.trim();
                if detail.is_empty() {
                    CommandOutcome::Failure(format!("{} exited with {}", command, output.status))
                } else {
                    CommandOutcome::Failure(detail.to_string())
                }
            }
        }
    }
}
