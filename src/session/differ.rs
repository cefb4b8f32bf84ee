//! Baseline-and-slice capture of a session's screen buffer.
//!
//! The multiplexer only offers a bulk dump of the visible screen plus a
//! bounded scrollback window, so new output is found by counting lines
//! before a command and slicing the dump afterwards.
//!
//! # Loss window
//!
//! Once the session holds more than `scrollback` history lines, the oldest
//! lines fall off the top of every dump. If that happens between baseline
//! and capture, indices shift and the slice silently starts late. Callers
//! can detect the risk with [`ScreenBufferDiffer::at_horizon`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::mux::Multiplexer;
use crate::session::SessionHandle;
use crate::{AppError, Result};

/// Counts and slices a session buffer over one fixed capture range.
pub struct ScreenBufferDiffer {
    mux: Arc<dyn Multiplexer>,
    scrollback: u32,
}

impl ScreenBufferDiffer {
    /// Create a differ dumping `scrollback` history lines on every capture.
    #[must_use]
    pub fn new(mux: Arc<dyn Multiplexer>, scrollback: u32) -> Self {
        Self { mux, scrollback }
    }

    /// Configured scrollback depth.
    #[must_use]
    pub fn scrollback(&self) -> u32 {
        self.scrollback
    }

    /// Number of content lines currently in the buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CaptureIncomplete` if the dump fails.
    pub async fn line_count(&self, session: &SessionHandle) -> Result<usize> {
        let lines = self.dump(session).await?;
        debug!(session = %session.name, lines = lines.len(), "buffer line count");
        Ok(lines.len())
    }

    /// Lines appended after `baseline`, in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CaptureIncomplete` if the dump fails or is empty.
    pub async fn capture_since(
        &self,
        session: &SessionHandle,
        baseline: usize,
    ) -> Result<Vec<String>> {
        let mut lines = self.dump(session).await?;
        if lines.is_empty() {
            return Err(AppError::CaptureIncomplete(format!(
                "buffer of session '{}' is empty",
                session.name
            )));
        }

        if baseline > lines.len() {
            warn!(
                session = %session.name,
                baseline,
                lines = lines.len(),
                "buffer shrank below baseline (cleared or scrolled past horizon)"
            );
            return Ok(Vec::new());
        }

        Ok(lines.split_off(baseline))
    }

    /// Whether a buffer of `line_count` lines has reached the scrollback
    /// horizon, after which new output pushes old lines out of the dump.
    #[must_use]
    pub fn at_horizon(&self, line_count: usize) -> bool {
        line_count >= usize::try_from(self.scrollback).unwrap_or(usize::MAX)
    }

    async fn dump(&self, session: &SessionHandle) -> Result<Vec<String>> {
        let raw = self
            .mux
            .capture_buffer(&session.name, self.scrollback)
            .await?;
        Ok(buffer_lines(&raw))
    }
}

/// Split a raw dump into lines, dropping the blank rows tmux pads the
/// visible screen with.
#[must_use]
pub fn buffer_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = raw.lines().map(str::to_owned).collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines
}
