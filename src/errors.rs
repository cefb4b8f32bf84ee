//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// No live session matched the configured terminal or name.
    SessionNotFound(String),
    /// A multiplexer control call (enumerate, create, send text, submit) failed.
    SessionCommand(String),
    /// The buffer dump failed or came back empty.
    CaptureIncomplete(String),
    /// The RPC child produced no correlated response before the deadline.
    RpcTimeout(String),
    /// Malformed or missing JSON for the expected response id.
    RpcProtocol(String),
    /// A well-formed error returned by the tool itself.
    Tool(String),
    /// Command text rejected before it reached the session.
    InvalidCommand(String),
    /// The secondary analysis CLI failed or exited non-zero.
    Agent(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error must abort a multi-command dispatch run.
    ///
    /// Session lookup and control-call failures leave nothing usable for the
    /// commands that follow.
    #[must_use]
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::SessionCommand(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::SessionCommand(msg) => write!(f, "session command failed: {msg}"),
            Self::CaptureIncomplete(msg) => write!(f, "capture incomplete: {msg}"),
            Self::RpcTimeout(msg) => write!(f, "rpc timeout: {msg}"),
            Self::RpcProtocol(msg) => write!(f, "rpc protocol: {msg}"),
            Self::Tool(msg) => write!(f, "tool: {msg}"),
            Self::InvalidCommand(msg) => write!(f, "invalid command: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::RpcProtocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
