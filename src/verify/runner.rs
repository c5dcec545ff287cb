//! Check-command execution.
//!
//! The runner reports two different kinds of trouble: a check that ran and
//! failed comes back as `Ok(CheckRun { passed: false, .. })`, while a check that
//! could not run (spawn failure, timeout, command not found) comes back as a
//! `RunnerError`. Only the latter is retried.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::audit::ChangedArtifact;
use crate::errors::RunnerError;
use crate::policy::CheckStep;

/// Exit status `sh` uses when the command does not exist.
const EXIT_COMMAND_NOT_FOUND: i32 = 127;
/// Exit status `sh` uses when the command exists but is not executable.
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Result of a check that actually ran.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRun {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub log: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one check. `workdir` overrides the runner's default directory.
    async fn run(
        &self,
        step: &CheckStep,
        artifacts: &[ChangedArtifact],
        workdir: Option<&Path>,
    ) -> Result<CheckRun, RunnerError>;
}

/// Runs each check through `sh -c` in the project directory, or in the
/// directory the request names.
///
/// The changed paths are exported as `WARDEN_CHANGED_FILES` (newline separated)
/// and the step name as `WARDEN_CHECK`.
pub struct ShellRunner {
    workdir: PathBuf,
    log_limit_bytes: usize,
}

impl ShellRunner {
    pub fn new(workdir: impl AsRef<Path>, log_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            log_limit_bytes,
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        step: &CheckStep,
        artifacts: &[ChangedArtifact],
        workdir: Option<&Path>,
    ) -> Result<CheckRun, RunnerError> {
        let changed: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();

        tracing::debug!(step = %step.name, command = %step.command, "running check");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&step.command)
            .current_dir(workdir.unwrap_or(&self.workdir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("WARDEN_CHECK", &step.name)
            .env("WARDEN_CHANGED_FILES", changed.join("\n"))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                step: step.name.clone(),
                source,
            })?;

        let output = match timeout(
            Duration::from_secs(step.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result.map_err(|source| RunnerError::Spawn {
                step: step.name.clone(),
                source,
            })?,
            Err(_) => {
                // The child is dropped with the future and killed.
                return Err(RunnerError::Timeout {
                    step: step.name.clone(),
                    secs: step.timeout_secs,
                });
            }
        };

        let exit_code = output.status.code();
        let log = format_log(&output.stdout, &output.stderr, self.log_limit_bytes);

        match exit_code {
            Some(EXIT_COMMAND_NOT_FOUND) | Some(EXIT_NOT_EXECUTABLE) => {
                Err(RunnerError::Unavailable {
                    step: step.name.clone(),
                    message: format!(
                        "command could not be executed (exit {}): {}",
                        exit_code.unwrap_or_default(),
                        tail(&log, 300).trim()
                    ),
                })
            }
            None => Err(RunnerError::Unavailable {
                step: step.name.clone(),
                message: "terminated by signal".to_string(),
            }),
            Some(code) => Ok(CheckRun {
                passed: code == 0,
                exit_code: Some(code),
                log,
            }),
        }
    }
}

fn format_log(stdout: &[u8], stderr: &[u8], limit: usize) -> String {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(stderr));
    truncate_log(&buf, limit)
}

/// Keep the first `limit` bytes (on a char boundary) and note how much was cut.
pub fn truncate_log(log: &str, limit: usize) -> String {
    if log.len() <= limit {
        return log.to_string();
    }
    let mut cut = limit;
    while !log.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]\n", &log[..cut], log.len() - cut)
}

/// Last `max` bytes of `log`, on a char boundary.
pub fn tail(log: &str, max: usize) -> &str {
    if log.len() <= max {
        return log;
    }
    let mut start = log.len() - max;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    &log[start..]
}
