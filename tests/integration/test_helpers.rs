//! Shared test helpers for integration tests.
//!
//! [`FakeMultiplexer`] stands in for tmux: sessions and the buffer are plain
//! in-memory values, and a scripted responder appends output when a command
//! is submitted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_relay::dispatch::wait::{FixedDelay, Quiescence, WaitPolicy};
use agent_relay::mux::{Multiplexer, MuxFuture, SessionInfo};
use agent_relay::AppError;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct FakeState {
    sessions: Vec<SessionInfo>,
    buffer: Vec<String>,
    pending: String,
    responder: Option<Responder>,
    drip: VecDeque<String>,
    submitted: Vec<String>,
    created: Vec<String>,
    captures: usize,
    fail_captures_from: Option<usize>,
    fail_sends: bool,
    fail_list: bool,
}

/// In-memory multiplexer with one shared buffer for every session.
#[derive(Default)]
pub struct FakeMultiplexer {
    state: Mutex<FakeState>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, name: &str, tty: Option<&str>) -> Self {
        self.lock().sessions.push(SessionInfo {
            name: name.to_owned(),
            tty: tty.map(str::to_owned),
        });
        self
    }

    pub fn with_buffer(self, lines: &[&str]) -> Self {
        self.lock()
            .buffer
            .extend(lines.iter().map(|l| (*l).to_owned()));
        self
    }

    /// On every submit, append `> <command>` and then whatever `responder`
    /// returns for the command.
    pub fn respond_with<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue lines released one per capture once a command has been
    /// submitted, simulating slow output.
    pub fn drip(&self, lines: &[&str]) {
        self.lock()
            .drip
            .extend(lines.iter().map(|l| (*l).to_owned()));
    }

    /// Fail every capture from the `n`th (0-based) onwards.
    pub fn fail_captures_from(&self, n: usize) {
        self.lock().fail_captures_from = Some(n);
    }

    pub fn fail_sends(&self) {
        self.lock().fail_sends = true;
    }

    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    pub fn push_lines(&self, lines: &[&str]) {
        self.lock()
            .buffer
            .extend(lines.iter().map(|l| (*l).to_owned()));
    }

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    fn require_session(state: &FakeState, name: &str) -> agent_relay::Result<()> {
        if state.sessions.iter().any(|s| s.name == name) {
            Ok(())
        } else {
            Err(AppError::SessionCommand(format!("can't find session: {name}")))
        }
    }
}

impl Multiplexer for FakeMultiplexer {
    fn list_sessions(&self) -> MuxFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_list {
                return Err(AppError::SessionCommand("list-panes: exit status 1".into()));
            }
            Ok(state.sessions.clone())
        })
    }

    fn create_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.sessions.iter().any(|s| s.name == name) {
                return Err(AppError::SessionCommand(format!("duplicate session: {name}")));
            }
            let tty = format!("/dev/pts/{}", 100 + state.sessions.len());
            state.sessions.push(SessionInfo {
                name: name.to_owned(),
                tty: Some(tty),
            });
            state.created.push(name.to_owned());
            Ok(())
        })
    }

    fn send_text<'a>(&'a self, session: &'a str, text: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            Self::require_session(&state, session)?;
            if state.fail_sends {
                return Err(AppError::SessionCommand("send-keys: exit status 1".into()));
            }
            state.pending.push_str(text);
            Ok(())
        })
    }

    fn send_submit<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            Self::require_session(&state, session)?;
            if state.fail_sends {
                return Err(AppError::SessionCommand("send-keys: exit status 1".into()));
            }
            let command = std::mem::take(&mut state.pending);
            state.buffer.push(format!("> {command}"));
            let output = state
                .responder
                .as_mut()
                .map(|respond| respond(&command))
                .unwrap_or_default();
            state.buffer.extend(output);
            state.submitted.push(command);
            Ok(())
        })
    }

    fn capture_buffer<'a>(&'a self, session: &'a str, scrollback: u32) -> MuxFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            let index = state.captures;
            state.captures += 1;
            if state.fail_captures_from.is_some_and(|n| index >= n) {
                return Err(AppError::CaptureIncomplete("capture-pane: exit status 1".into()));
            }
            if !state.sessions.iter().any(|s| s.name == session) {
                return Err(AppError::CaptureIncomplete(format!(
                    "can't find session: {session}"
                )));
            }
            if !state.submitted.is_empty() {
                if let Some(line) = state.drip.pop_front() {
                    state.buffer.push(line);
                }
            }
            let depth = usize::try_from(scrollback).unwrap_or(usize::MAX);
            let start = state.buffer.len().saturating_sub(depth);
            // tmux pads the visible screen with blank rows.
            Ok(format!("{}\n\n\n", state.buffer[start..].join("\n")))
        })
    }

    fn clear_history<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            Self::require_session(&state, session)?;
            state.buffer.clear();
            Ok(())
        })
    }

    fn kill_session<'a>(&'a self, session: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            Self::require_session(&state, session)?;
            state.sessions.retain(|s| s.name != session);
            Ok(())
        })
    }
}

/// Erase the concrete type for APIs taking `Arc<dyn Multiplexer>`.
pub fn as_mux(fake: &Arc<FakeMultiplexer>) -> Arc<dyn Multiplexer> {
    Arc::clone(fake) as Arc<dyn Multiplexer>
}

/// A fixed wait short enough for tests.
pub fn quick_fixed() -> Box<dyn WaitPolicy> {
    Box::new(FixedDelay::new(Duration::from_millis(5)))
}

/// A quiescence policy with millisecond timings.
pub fn quick_quiescence(max_wait: Duration) -> Box<dyn WaitPolicy> {
    Box::new(Quiescence {
        poll_interval: Duration::from_millis(5),
        stable_polls: 2,
        min_wait: Duration::from_millis(10),
        max_wait,
    })
}
