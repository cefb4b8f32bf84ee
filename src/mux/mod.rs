//! Terminal-multiplexer control surface.
//!
//! The [`Multiplexer`] trait is the only seam between the session core
//! (locator, differ, dispatcher) and the program hosting the interactive
//! session. Every operation returns immediately; none of them observe
//! whether the program inside the session has reacted.

pub mod tmux;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Boxed future returned by [`Multiplexer`] operations.
pub type MuxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One live session as reported by the multiplexer.
///
/// A session with several panes is reported once per pane, so the same
/// `name` may appear with different `tty` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session name.
    pub name: String,
    /// Controlling terminal device of the pane (e.g. `/dev/pts/3`).
    pub tty: Option<String>,
}

/// Operations consumed from the multiplexer.
pub trait Multiplexer: Send + Sync {
    /// Enumerate live sessions with their bound terminal device.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand)
    /// if enumeration fails. A multiplexer with no server running reports
    /// an empty list instead.
    fn list_sessions(&self) -> MuxFuture<'_, Vec<SessionInfo>>;

    /// Start a new detached session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand) on failure.
    fn create_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()>;

    /// Type `text` literally into the session without submitting it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand) on failure.
    fn send_text<'a>(&'a self, session: &'a str, text: &'a str) -> MuxFuture<'a, ()>;

    /// Press Enter in the session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand) on failure.
    fn send_submit<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()>;

    /// Dump the visible screen plus up to `scrollback` history lines.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CaptureIncomplete`](crate::AppError::CaptureIncomplete) on failure.
    fn capture_buffer<'a>(&'a self, session: &'a str, scrollback: u32) -> MuxFuture<'a, String>;

    /// Drop the session's scrollback history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand) on failure.
    fn clear_history<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()>;

    /// Destroy the session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionCommand`](crate::AppError::SessionCommand) on failure.
    fn kill_session<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()>;
}
