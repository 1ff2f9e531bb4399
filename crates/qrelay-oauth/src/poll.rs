//! Polling state machine for the device authorization grant.
//!
//! The machine is pure: it never sleeps or talks to the network. The
//! authenticator feeds it one outcome per token-endpoint poll and sleeps for
//! whatever delay it hands back.

use std::time::{Duration, Instant};

/// Lifecycle of one device-token polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No poll has been answered yet.
    Started,
    /// The user has not approved yet; polling at the current interval.
    Pending,
    /// The provider asked us to slow down; the interval was increased.
    BackingOff,
    /// A token was issued.
    Succeeded,
    /// The provider rejected the grant.
    Failed,
    /// The authorization window closed before a token was issued.
    TimedOut,
}

impl PollState {
    /// Whether the session is over.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed | PollState::TimedOut
        )
    }
}

/// Classified answer to a single token-endpoint poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// `authorization_pending`
    Pending,
    /// `slow_down`
    SlowDown,
    /// Token issued.
    Granted,
    /// Any other error.
    Denied,
}

/// Drives the interval and deadline bookkeeping for one authorization attempt.
#[derive(Debug)]
pub struct DevicePoller {
    state: PollState,
    interval: Duration,
    slow_down_floor: Duration,
    deadline: Instant,
    attempts: u32,
}

impl DevicePoller {
    /// Start a session that may poll until `started + window`.
    ///
    /// Returns `None` when that deadline is not representable.
    pub fn new(
        interval: Duration,
        slow_down_floor: Duration,
        window: Duration,
        started: Instant,
    ) -> Option<Self> {
        Some(Self {
            state: PollState::Started,
            interval,
            slow_down_floor,
            deadline: started.checked_add(window)?,
            attempts: 0,
        })
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Current delay between polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of outcomes recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another poll may be sent at `now`.
    ///
    /// Moves the session to [`PollState::TimedOut`] once the window has closed.
    pub fn may_poll(&mut self, now: Instant) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if now >= self.deadline {
            self.state = PollState::TimedOut;
            return false;
        }
        true
    }

    /// Record the outcome of a poll.
    ///
    /// Returns the delay to wait before the next poll, or `None` when the
    /// session has ended.
    pub fn record(&mut self, outcome: PollOutcome) -> Option<Duration> {
        if self.state.is_terminal() {
            return None;
        }
        self.attempts += 1;

        match outcome {
            PollOutcome::Pending => {
                self.state = PollState::Pending;
                Some(self.interval)
            }
            PollOutcome::SlowDown => {
                self.interval = (self.interval * 2).max(self.slow_down_floor);
                self.state = PollState::BackingOff;
                Some(self.interval)
            }
            PollOutcome::Granted => {
                self.state = PollState::Succeeded;
                None
            }
            PollOutcome::Denied => {
                self.state = PollState::Failed;
                None
            }
        }
    }
}
