//! tmux backend for [`Multiplexer`].
//!
//! Each operation runs one `tmux` invocation and waits for it to exit.
//! Text is sent with `send-keys -l` so key names inside a command (`Enter`,
//! `C-c`) are typed literally rather than interpreted.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::mux::{Multiplexer, MuxFuture, SessionInfo};
use crate::{AppError, Result};

/// Separator between fields in the `list-panes` format string.
const FIELD_SEPARATOR: char = '\t';

/// Drives sessions through the `tmux` command-line client.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
    socket: Option<PathBuf>,
}

impl TmuxMultiplexer {
    /// Use `tmux` from `PATH` on its default socket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "tmux".into(),
            socket: None,
        }
    }

    /// Talk to the server listening on `socket` (`tmux -S`).
    #[must_use]
    pub fn with_socket(mut self, socket: Option<PathBuf>) -> Self {
        self.socket = socket;
        self
    }

    /// Run `tmux` with `args` and return stdout, or stderr on failure.
    async fn run(&self, args: Vec<OsString>) -> std::result::Result<String, String> {
        let mut cmd = Command::new(&self.binary);
        if let Some(socket) = &self.socket {
            cmd.arg("-S").arg(socket);
        }
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(?args, "tmux invocation");

        let output = cmd
            .output()
            .await
            .map_err(|err| format!("failed to run {}: {err}", self.binary))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            Err(format!("{} ({})", stderr, output.status))
        }
    }

    async fn control(&self, args: Vec<OsString>, what: &str) -> Result<()> {
        self.run(args)
            .await
            .map(|_| ())
            .map_err(|err| AppError::SessionCommand(format!("{what}: {err}")))
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn list_sessions(&self) -> MuxFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            match self.run(list_panes_args()).await {
                Ok(stdout) => Ok(parse_pane_listing(&stdout)),
                Err(err) if is_no_server(&err) => {
                    debug!(error = %err, "tmux server not running; no sessions");
                    Ok(Vec::new())
                }
                Err(err) => Err(AppError::SessionCommand(format!(
                    "failed to list sessions: {err}"
                ))),
            }
        })
    }

    fn create_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.control(
                os_args(&["new-session", "-d", "-s", name]),
                &format!("failed to create session '{name}'"),
            )
            .await
        })
    }

    fn send_text<'a>(&'a self, session: &'a str, text: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.control(
                send_literal_args(session, text),
                &format!("failed to send text to session '{session}'"),
            )
            .await
        })
    }

    fn send_submit<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.control(
                os_args(&["send-keys", "-t", session, "Enter"]),
                &format!("failed to submit in session '{session}'"),
            )
            .await
        })
    }

    fn capture_buffer<'a>(&'a self, session: &'a str, scrollback: u32) -> MuxFuture<'a, String> {
        Box::pin(async move {
            self.run(capture_args(session, scrollback))
                .await
                .map_err(|err| {
                    AppError::CaptureIncomplete(format!(
                        "failed to capture session '{session}': {err}"
                    ))
                })
        })
    }

    fn clear_history<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.control(
                os_args(&["clear-history", "-t", session]),
                &format!("failed to clear history of session '{session}'"),
            )
            .await
        })
    }

    fn kill_session<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.control(
                os_args(&["kill-session", "-t", session]),
                &format!("failed to kill session '{session}'"),
            )
            .await
        })
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

fn list_panes_args() -> Vec<OsString> {
    let format = format!("#{{session_name}}{FIELD_SEPARATOR}#{{pane_tty}}");
    os_args(&["list-panes", "-a", "-F", format.as_str()])
}

fn send_literal_args(session: &str, text: &str) -> Vec<OsString> {
    os_args(&["send-keys", "-l", "-t", session, text])
}

/// Visible screen plus `scrollback` history lines. `lineCount` and
/// `captureSince` both go through here so their indices agree.
fn capture_args(session: &str, scrollback: u32) -> Vec<OsString> {
    let start = format!("-{scrollback}");
    os_args(&["capture-pane", "-p", "-t", session, "-S", start.as_str()])
}

/// Parse `list-panes -a` output into one entry per pane.
fn parse_pane_listing(stdout: &str) -> Vec<SessionInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once(FIELD_SEPARATOR) {
            Some((name, tty)) => SessionInfo {
                name: name.to_owned(),
                tty: Some(tty.trim().to_owned()).filter(|t| !t.is_empty()),
            },
            None => SessionInfo {
                name: line.to_owned(),
                tty: None,
            },
        })
        .collect()
}

/// tmux's answer when no server owns the socket. A connect error only
/// counts when the socket file is missing; permission and other failures
/// are real errors.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || (stderr.contains("error connecting to")
            && stderr.contains("No such file or directory"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
