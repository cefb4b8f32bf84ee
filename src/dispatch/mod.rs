//! Command dispatch against a live session.
//!
//! For each command the dispatcher records a baseline line count, types the
//! text, presses Enter, waits according to its [`WaitPolicy`], and slices
//! everything past the baseline out of the buffer. Commands run strictly one
//! after another: the session is a single text stream and output from
//! overlapping commands could not be told apart.
//!
//! Failure policy:
//! - `SessionNotFound` / `SessionCommand` abort the run.
//! - A failed baseline capture aborts the run (nothing has been sent yet).
//! - A failed post-send capture is recorded on that response as
//!   [`Completeness::Failed`] and the run continues.

pub mod wait;

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::dispatch::wait::{Observation, WaitOutcome, WaitPolicy};
use crate::mux::Multiplexer;
use crate::session::differ::ScreenBufferDiffer;
use crate::session::locator::{SessionLocator, SettleDelays};
use crate::session::SessionHandle;
use crate::{AppError, Result};

/// One line of user input, submitted with an implicit Enter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Validate `text` as a single-line command.
    ///
    /// A trailing line break is treated as the submit the dispatcher sends
    /// anyway and is stripped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidCommand` if the text is blank or contains
    /// an embedded newline or other control character.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let line = text.trim_end_matches(&['\r', '\n'][..]);

        if line.trim().is_empty() {
            return Err(AppError::InvalidCommand("command must not be empty".into()));
        }
        if let Some(c) = line.chars().find(|c| c.is_control()) {
            return Err(AppError::InvalidCommand(format!(
                "command contains control character {c:?}: {line:?}"
            )));
        }

        Ok(Self(line.to_owned()))
    }

    /// Text typed into the session.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.0
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much trust to place in a captured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    /// The buffer was observed to stop changing before capture.
    Settled,
    /// Captured on a timer; the program may still have been writing.
    Unverified,
    /// The buffer reached the scrollback depth; leading lines may be missing.
    HorizonReached,
    /// The post-send capture failed.
    Failed(String),
}

impl Display for Completeness {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settled => f.write_str("settled"),
            Self::Unverified => f.write_str("unverified (fixed wait)"),
            Self::HorizonReached => f.write_str("possibly incomplete (scrollback horizon)"),
            Self::Failed(reason) => write!(f, "capture failed: {reason}"),
        }
    }
}

/// Output attributed to one command.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    /// Command that produced the output.
    pub command: Command,
    /// Buffer line count recorded just before sending.
    pub baseline: usize,
    /// Lines appended after the baseline, in order.
    pub lines: Vec<String>,
    /// When the capture was taken.
    pub captured_at: DateTime<Local>,
    /// Confidence flag for the capture.
    pub completeness: Completeness,
}

impl CapturedResponse {
    /// Captured lines joined with `\n`.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Where a run sends its commands.
#[derive(Debug, Clone)]
pub enum DispatchTarget {
    /// An existing session, by bound terminal first and name second.
    Existing {
        /// Session name fallback.
        name: String,
        /// Terminal the operator is watching.
        tty: Option<String>,
    },
    /// A new detached session with a bootstrap program.
    Create {
        /// Name for the new session.
        name: String,
        /// Program launched inside it.
        bootstrap: String,
        /// Settle delays around creation.
        settle: SettleDelays,
    },
}

/// Sends commands to a session and captures what each one printed.
pub struct CommandDispatcher {
    mux: Arc<dyn Multiplexer>,
    differ: ScreenBufferDiffer,
    wait: Box<dyn WaitPolicy>,
}

impl CommandDispatcher {
    /// Build a dispatcher dumping `scrollback` history lines per capture.
    #[must_use]
    pub fn new(mux: Arc<dyn Multiplexer>, scrollback: u32, wait: Box<dyn WaitPolicy>) -> Self {
        let differ = ScreenBufferDiffer::new(Arc::clone(&mux), scrollback);
        Self { mux, differ, wait }
    }

    /// Active wait policy.
    #[must_use]
    pub fn wait_policy(&self) -> &dyn WaitPolicy {
        self.wait.as_ref()
    }

    /// Resolve or create the session named by `target`.
    ///
    /// # Errors
    ///
    /// Propagates `SessionNotFound` and `SessionCommand`.
    pub async fn prepare(&self, target: &DispatchTarget) -> Result<SessionHandle> {
        let locator = SessionLocator::new(Arc::clone(&self.mux));
        match target {
            DispatchTarget::Existing { name, tty } => locator.resolve(name, tty.as_deref()).await,
            DispatchTarget::Create {
                name,
                bootstrap,
                settle,
            } => locator.create_session(name, bootstrap, *settle).await,
        }
    }

    /// Resolve `target` and run `commands` in order, collecting responses.
    ///
    /// # Errors
    ///
    /// Fails fast on the first session or send failure; responses captured
    /// before the failure are dropped.
    pub async fn run(
        &self,
        target: &DispatchTarget,
        commands: &[Command],
    ) -> Result<Vec<CapturedResponse>> {
        let mut responses = Vec::with_capacity(commands.len());
        self.run_with(target, commands, |response| {
            responses.push(response.clone());
            Ok(())
        })
        .await?;
        Ok(responses)
    }

    /// Resolve `target` and run `commands`, handing each response to
    /// `on_response` as soon as it is captured.
    ///
    /// Returns the session that was used.
    ///
    /// # Errors
    ///
    /// Fails fast on session or send failures and on errors returned by
    /// `on_response`.
    pub async fn run_with<F>(
        &self,
        target: &DispatchTarget,
        commands: &[Command],
        mut on_response: F,
    ) -> Result<SessionHandle>
    where
        F: FnMut(&CapturedResponse) -> Result<()>,
    {
        let session = self.prepare(target).await?;
        info!(
            session = %session.name,
            commands = commands.len(),
            wait = ?self.wait,
            "dispatch run starting"
        );

        for command in commands {
            let response = self.dispatch(&session, command).await?;
            on_response(&response)?;
        }

        Ok(session)
    }

    /// Send one command to `session` and capture its output.
    ///
    /// # Errors
    ///
    /// - `AppError::CaptureIncomplete` if the baseline dump failed.
    /// - `AppError::SessionCommand` if typing or submitting failed.
    pub async fn dispatch(
        &self,
        session: &SessionHandle,
        command: &Command,
    ) -> Result<CapturedResponse> {
        async move {
            let baseline = self.differ.line_count(session).await?;
            info!(baseline, %command, "sending command");

            self.mux.send_text(&session.name, command.text()).await?;
            self.mux.send_submit(&session.name).await?;

            let outcome = self.wait_for_output(session).await;
            let captured_at = Local::now();

            let (lines, completeness) = match self.differ.capture_since(session, baseline).await {
                Ok(lines) => {
                    let completeness = if self.differ.at_horizon(baseline + lines.len()) {
                        Completeness::HorizonReached
                    } else if outcome == WaitOutcome::Settled {
                        Completeness::Settled
                    } else {
                        Completeness::Unverified
                    };
                    (lines, completeness)
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    warn!(%err, "failed to capture response");
                    (Vec::new(), Completeness::Failed(err.to_string()))
                }
            };

            info!(
                lines = lines.len(),
                completeness = %completeness,
                "response captured"
            );

            Ok(CapturedResponse {
                command: command.clone(),
                baseline,
                lines,
                captured_at,
                completeness,
            })
        }
        .instrument(info_span!("dispatch", session = %session.name))
        .await
    }

    /// Drive the wait policy until it settles or its deadline passes.
    async fn wait_for_output(&self, session: &SessionHandle) -> WaitOutcome {
        let policy = self.wait.as_ref();
        let started = Instant::now();
        let mut samples = Vec::new();

        loop {
            let remaining = policy.max_wait().saturating_sub(started.elapsed());
            tokio::time::sleep(policy.poll_interval().min(remaining)).await;

            if policy.observe_buffer() {
                match self.differ.line_count(session).await {
                    Ok(count) => samples.push(count),
                    Err(err) => warn!(%err, "buffer sample failed; continuing to wait"),
                }
            }

            let observation = Observation {
                elapsed: started.elapsed(),
                samples: &samples,
            };
            if policy.has_settled(&observation) {
                return WaitOutcome::Settled;
            }
            if observation.elapsed >= policy.max_wait() {
                return WaitOutcome::DeadlineReached;
            }
        }
    }
}
