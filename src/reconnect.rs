//! Reconnect pacing after a session ends
//!
//! The policy never opens sockets itself. It decides whether and when the
//! client should call `connect()` again, and the tick asks it whether that
//! moment has come.

use crate::error::CloseReason;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Default pause between a disconnect and the next attempt
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(5_000);

/// Outcome of a session ending, as reported to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Next attempt at the given instant
    Scheduled(Instant),
    /// Suppressed because the client is dormant
    Dormant,
    /// Critical pool error; the orchestrator decides what happens next
    Stopped,
    /// Local disconnect or teardown; nothing scheduled
    Manual,
}

impl ReconnectDecision {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ReconnectDecision::Scheduled(_))
    }
}

impl fmt::Display for ReconnectDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectDecision::Scheduled(_) => f.write_str("scheduled"),
            ReconnectDecision::Dormant => f.write_str("dormant"),
            ReconnectDecision::Stopped => f.write_str("stopped"),
            ReconnectDecision::Manual => f.write_str("manual"),
        }
    }
}

/// Retry pacing, dormancy and the consecutive failure counter
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    retry_pause: Duration,
    dormant: bool,
    suppressed: bool,
    failures: u64,
    next_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(retry_pause: Duration) -> Self {
        Self {
            retry_pause,
            dormant: false,
            suppressed: false,
            failures: 0,
            next_attempt: None,
        }
    }

    pub fn retry_pause(&self) -> Duration {
        self.retry_pause
    }

    /// Change the pause; applies to attempts scheduled from now on
    pub fn set_retry_pause(&mut self, pause: Duration) {
        self.retry_pause = pause;
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant
    }

    /// Toggle dormancy
    ///
    /// Entering dormancy cancels a pending attempt. Leaving it schedules the
    /// attempt that dormancy suppressed, if any, and returns its time.
    pub fn set_dormancy(&mut self, dormant: bool, now: Instant) -> Option<Instant> {
        self.dormant = dormant;

        if dormant {
            if self.next_attempt.take().is_some() {
                self.suppressed = true;
            }
            return None;
        }

        if std::mem::take(&mut self.suppressed) {
            let at = now + self.retry_pause;
            self.next_attempt = Some(at);
            return Some(at);
        }
        None
    }

    /// Consecutive failed sessions since the last successful login
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Login succeeded
    pub fn on_login_success(&mut self) {
        self.failures = 0;
    }

    /// A session ended; decide what happens next
    pub fn on_disconnect(&mut self, reason: CloseReason, now: Instant) -> ReconnectDecision {
        self.next_attempt = None;
        self.suppressed = false;

        if reason == CloseReason::Graceful {
            return ReconnectDecision::Manual;
        }

        self.failures = self.failures.saturating_add(1);

        if reason == CloseReason::Critical {
            return ReconnectDecision::Stopped;
        }

        if self.dormant {
            self.suppressed = true;
            return ReconnectDecision::Dormant;
        }

        let at = now + self.retry_pause;
        self.next_attempt = Some(at);
        ReconnectDecision::Scheduled(at)
    }

    /// Pending attempt, if any
    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Consume the pending attempt when it is due
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.next_attempt {
            Some(at) if now >= at => {
                self.next_attempt = None;
                true
            }
            _ => false,
        }
    }

    /// Forget any pending or suppressed attempt
    pub fn cancel(&mut self) {
        self.next_attempt = None;
        self.suppressed = false;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_PAUSE)
    }
}
