//! Wait policies deciding when a dispatched command has finished responding.
//!
//! Nothing in the session reports completion, so every policy is a timing
//! heuristic. The dispatcher drives a policy in a loop: sleep
//! [`poll_interval`](WaitPolicy::poll_interval), optionally sample the
//! buffer line count, ask [`has_settled`](WaitPolicy::has_settled), and stop
//! at [`max_wait`](WaitPolicy::max_wait) regardless.

use std::fmt::Debug;
use std::time::Duration;

/// What the dispatcher has seen since the command was submitted.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Time since the command was submitted.
    pub elapsed: Duration,
    /// Buffer line counts, one per poll, oldest first. Empty for policies
    /// that do not [`observe_buffer`](WaitPolicy::observe_buffer).
    pub samples: &'a [usize],
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The policy's settle predicate held.
    Settled,
    /// `max_wait` elapsed first.
    DeadlineReached,
}

/// Injectable strategy for waiting between submit and capture.
pub trait WaitPolicy: Send + Sync + Debug {
    /// Sleep between observations.
    fn poll_interval(&self) -> Duration;

    /// Hard upper bound on the wait.
    fn max_wait(&self) -> Duration;

    /// Whether each poll should sample the buffer line count.
    fn observe_buffer(&self) -> bool {
        false
    }

    /// Whether output has stopped arriving.
    fn has_settled(&self, observation: &Observation<'_>) -> bool;
}

/// Sleep a fixed delay and capture, never sampling the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    /// Delay between submit and capture.
    pub delay: Duration,
}

impl FixedDelay {
    /// Delay for chains of small commands the program handles near-instantly.
    pub const SHORT: Duration = Duration::from_secs(2);
    /// Delay for a single command the program spends real work on.
    pub const LONG: Duration = Duration::from_secs(60);

    /// Wait exactly `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// [`FixedDelay::SHORT`].
    #[must_use]
    pub fn short() -> Self {
        Self::new(Self::SHORT)
    }

    /// [`FixedDelay::LONG`].
    #[must_use]
    pub fn long() -> Self {
        Self::new(Self::LONG)
    }
}

impl WaitPolicy for FixedDelay {
    fn poll_interval(&self) -> Duration {
        self.delay
    }

    fn max_wait(&self) -> Duration {
        self.delay
    }

    fn has_settled(&self, _observation: &Observation<'_>) -> bool {
        false
    }
}

/// Poll the buffer until its line count holds still.
///
/// Settled once `min_wait` has passed and the last `stable_polls + 1`
/// samples are equal, i.e. `stable_polls` consecutive polls saw no change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quiescence {
    /// Sleep between samples.
    pub poll_interval: Duration,
    /// Consecutive unchanged polls required.
    pub stable_polls: u32,
    /// Earliest point at which the buffer may be declared quiet.
    pub min_wait: Duration,
    /// Give up and capture anyway after this long.
    pub max_wait: Duration,
}

impl WaitPolicy for Quiescence {
    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn max_wait(&self) -> Duration {
        self.max_wait
    }

    fn observe_buffer(&self) -> bool {
        true
    }

    fn has_settled(&self, observation: &Observation<'_>) -> bool {
        if observation.elapsed < self.min_wait {
            return false;
        }
        let window = usize::try_from(self.stable_polls)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        if observation.samples.len() < window {
            return false;
        }
        let tail = &observation.samples[observation.samples.len() - window..];
        tail.windows(2).all(|pair| pair[0] == pair[1])
    }
}
