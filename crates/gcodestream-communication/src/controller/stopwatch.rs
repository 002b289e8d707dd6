//! Send duration tracking
//!
//! Measures time spent streaming, excluding paused intervals. Once frozen
//! the reading never changes until the next reset.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StopwatchState {
    #[default]
    Idle,
    Running,
    Suspended,
    Frozen,
}

/// Pausable stopwatch for a streaming session
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    state: StopwatchState,
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing; no effect unless idle
    pub fn start(&mut self) {
        if self.state == StopwatchState::Idle {
            self.state = StopwatchState::Running;
            self.running_since = Some(Instant::now());
        }
    }

    /// Stop the clock without ending the session
    pub fn suspend(&mut self) {
        if self.state == StopwatchState::Running {
            self.bank();
            self.state = StopwatchState::Suspended;
        }
    }

    /// Continue after [`Stopwatch::suspend`]
    pub fn resume(&mut self) {
        if self.state == StopwatchState::Suspended {
            self.state = StopwatchState::Running;
            self.running_since = Some(Instant::now());
        }
    }

    /// Stop permanently and keep the reading
    pub fn freeze(&mut self) {
        if self.state == StopwatchState::Running {
            self.bank();
        }
        self.state = StopwatchState::Frozen;
    }

    /// Back to zero and idle
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.state == StopwatchState::Running
    }

    pub fn is_started(&self) -> bool {
        self.state != StopwatchState::Idle
    }

    pub fn is_frozen(&self) -> bool {
        self.state == StopwatchState::Frozen
    }

    /// Time accumulated so far
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.running_since) {
            (StopwatchState::Running, Some(since)) => self.accumulated + since.elapsed(),
            _ => self.accumulated,
        }
    }

    fn bank(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }
}
