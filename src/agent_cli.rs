//! Secondary analysis CLI.
//!
//! Runs a non-interactive agent process with the whole prompt as one
//! argument and takes its stdout wholesale as the analysis.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Launch settings for the analysis CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCli {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl AgentCli {
    /// Run `program` with `args` before the prompt, killed after `timeout`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from the `[agent]` config section.
    #[must_use]
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self::new(
            agent.program.clone(),
            agent.args.clone(),
            Duration::from_secs(agent.timeout_seconds),
        )
    }

    /// Ask the CLI to analyze `data` under `prompt`; returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` when the program is missing, exits non-zero,
    /// or runs past the timeout (it is killed in that case).
    pub async fn analyze(&self, prompt: &str, data: &str) -> Result<String> {
        let message = build_message(prompt, data);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&message)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        async move {
            let child = cmd.spawn().map_err(|err| match err.kind() {
                ErrorKind::NotFound => AppError::Agent(format!(
                    "{} not found; is it installed and on PATH?",
                    self.program
                )),
                _ => AppError::Agent(format!("failed to start {}: {err}", self.program)),
            })?;

            // Dropping the wait future on timeout drops the child, which kills it.
            let output = tokio::time::timeout(self.timeout, child.wait_with_output())
                .await
                .map_err(|_| {
                    warn!(timeout = ?self.timeout, "analysis timed out");
                    AppError::Agent(format!(
                        "{} timed out after {:?}",
                        self.program, self.timeout
                    ))
                })?
                .map_err(|err| AppError::Agent(format!("failed to read output: {err}")))?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let code = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_owned(), |c| c.to_string());
                return Err(AppError::Agent(format!(
                    "{} exited with {code}\nstderr: {}\nstdout: {}",
                    self.program,
                    stderr.trim(),
                    stdout.trim()
                )));
            }

            info!(bytes = stdout.len(), "analysis complete");
            Ok(stdout)
        }
        .instrument(info_span!("analyze", program = %self.program))
        .await
    }
}

/// Full prompt handed to the CLI.
#[must_use]
pub fn build_message(prompt: &str, data: &str) -> String {
    format!("{prompt}\n\nHere is the data to analyze:\n\n{data}\n")
}
