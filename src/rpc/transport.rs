//! One-shot line-framed exchange with a tool server child process.
//!
//! The server is spawned with the caller's environment plus overrides,
//! every outbound message is written as one JSON line, stdin is closed,
//! and stdout is read to EOF. Lines that are not JSON-RPC messages are
//! skipped, so diagnostics printed to stdout do not break the exchange.
//! The whole round trip (write, read, exit) shares one deadline; on expiry
//! the child is killed and `AppError::RpcTimeout` is returned instead of
//! whatever had been read so far.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::rpc::codec::LineCodec;
use crate::rpc::message::RpcMessage;
use crate::{AppError, Result};

/// How to launch the tool server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSpec {
    /// Executable path or name on `PATH`.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Working directory, if not the caller's.
    pub current_dir: Option<PathBuf>,
}

impl ServerSpec {
    /// Launch `program` with no arguments or overrides.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

/// Everything the server produced during one exchange.
#[derive(Debug)]
pub struct Exchange {
    /// Parsed inbound messages, in arrival order.
    pub messages: Vec<RpcMessage>,
    /// Number of non-empty stdout lines that were not JSON-RPC messages.
    pub skipped_lines: usize,
    /// Everything written to stderr.
    pub stderr: String,
    /// Exit status of the server.
    pub status: ExitStatus,
}

/// Run one exchange against a fresh server process.
///
/// # Errors
///
/// - `AppError::Io` if the server could not be spawned or its pipes failed.
/// - `AppError::RpcTimeout` if the server did not finish within `timeout`;
///   it has been killed.
pub async fn exchange(
    spec: &ServerSpec,
    outbound: &[RpcMessage],
    timeout: Duration,
) -> Result<Exchange> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to spawn {}: {err}", spec.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Io("failed to capture server stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Io("failed to capture server stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Io("failed to capture server stderr".into()))?;

    debug!(
        program = %spec.program,
        pid = child.id().unwrap_or(0),
        messages = outbound.len(),
        "tool server spawned"
    );

    let round_trip = async {
        write_messages(stdin, outbound).await?;
        let (inbound, stderr_text) = tokio::join!(read_messages(stdout), read_all(stderr));
        let (messages, skipped_lines) = inbound?;
        let status = child
            .wait()
            .await
            .map_err(|err| AppError::Io(format!("failed to wait for server: {err}")))?;
        Ok::<_, AppError>(Exchange {
            messages,
            skipped_lines,
            stderr: stderr_text,
            status,
        })
    };

    let outcome = tokio::time::timeout(timeout, round_trip).await;

    match outcome {
        Ok(result) => {
            if let Ok(exchange) = &result {
                info!(
                    program = %spec.program,
                    status = %exchange.status,
                    received = exchange.messages.len(),
                    skipped = exchange.skipped_lines,
                    "tool server exchange complete"
                );
            }
            result
        }
        Err(_elapsed) => {
            warn!(program = %spec.program, ?timeout, "tool server timed out, killing");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill tool server");
            }
            Err(AppError::RpcTimeout(format!(
                "{} produced no complete response within {timeout:?}",
                spec.program
            )))
        }
    }
}

/// Write every message as one line, flush, and close stdin.
///
/// A server that exits before reading its input closes the pipe; that is
/// not an error here since its stdout and exit status still tell the story.
async fn write_messages(mut stdin: ChildStdin, outbound: &[RpcMessage]) -> Result<()> {
    let mut payload = String::new();
    for msg in outbound {
        payload.push_str(&msg.to_line());
        payload.push('\n');
    }

    let written = async {
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await
    }
    .await;
    // EOF tells the server no more requests follow.
    drop(stdin);

    match written {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            debug!("server closed stdin before reading all messages");
            Ok(())
        }
        Err(err) => Err(AppError::Io(format!("write to server failed: {err}"))),
    }
}

/// Read stdout to EOF, keeping every line that parses as a message.
///
/// Overlong lines are dropped by the codec and count as skipped, as do
/// lines that are not valid UTF-8 JSON.
async fn read_messages<R>(stdout: R) -> Result<(Vec<RpcMessage>, usize)>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());
    let mut messages = Vec::new();
    let mut skipped = 0usize;

    while let Some(item) = framed.next().await {
        let line = item?;
        if line.trim().is_empty() {
            continue;
        }
        match RpcMessage::parse_line(&line) {
            Ok(msg) => messages.push(msg),
            Err(err) => {
                skipped += 1;
                debug!(error = %err, raw = %line, "skipping non-message stdout line");
            }
        }
    }

    skipped += framed.decoder().dropped_lines();
    Ok((messages, skipped))
}

async fn read_all<R>(mut stream: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Err(err) = stream.read_to_end(&mut buf).await {
        debug!(%err, "failed to read server stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
