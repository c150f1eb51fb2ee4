//! Response timeout and keepalive timers
//!
//! Both timers are plain deadlines evaluated from the periodic tick; nothing
//! here schedules work on its own.

use tokio::time::{Duration, Instant};

/// Default time allowed for a reply to login or submit
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default idle time before a keepalive ping
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(60_000);

/// What an expired deadline asks the client to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// An outstanding request went unanswered
    ResponseTimeout,
    /// A keepalive ping went unanswered
    KeepaliveTimeout,
    /// The session has been idle long enough to ping
    Ping,
}

/// Deadline bookkeeping for one connection
#[derive(Debug, Clone)]
pub struct TimeoutWatchdog {
    response_timeout: Duration,
    keepalive: Option<Duration>,
    response_deadline: Option<Instant>,
    idle_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,
}

impl TimeoutWatchdog {
    /// Create a watchdog; `keepalive: None` disables pings
    pub fn new(response_timeout: Duration, keepalive: Option<Duration>) -> Self {
        Self {
            response_timeout,
            keepalive,
            response_deadline: None,
            idle_deadline: None,
            ping_deadline: None,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive
    }

    /// A request expecting a reply went out
    ///
    /// Only arms the timer if nothing was outstanding before.
    pub fn request_sent(&mut self, now: Instant) {
        if self.response_deadline.is_none() {
            self.response_deadline = Some(now + self.response_timeout);
        }
    }

    /// A reply arrived; `outstanding` is what is still waiting
    pub fn response_received(&mut self, now: Instant, outstanding: usize) {
        self.response_deadline = if outstanding == 0 {
            None
        } else {
            Some(now + self.response_timeout)
        };
    }

    /// Connection is up; begin idle tracking
    pub fn start_keepalive(&mut self, now: Instant) {
        self.ping_deadline = None;
        self.idle_deadline = self.keepalive.map(|interval| now + interval);
    }

    /// Traffic seen on the connection
    pub fn activity(&mut self, now: Instant) {
        if let (Some(_), Some(interval)) = (self.idle_deadline, self.keepalive) {
            self.idle_deadline = Some(now + interval);
        }
    }

    /// Idle deadline passed and could not ping yet; try again later
    pub fn postpone_ping(&mut self, now: Instant) {
        self.activity(now);
    }

    /// A keepalive ping went out
    pub fn ping_sent(&mut self, now: Instant) {
        self.idle_deadline = None;
        self.ping_deadline = Some(now + self.response_timeout);
    }

    /// The ping was answered
    pub fn pong_received(&mut self, now: Instant) {
        self.ping_deadline = None;
        self.idle_deadline = self.keepalive.map(|interval| now + interval);
    }

    /// Check deadlines against `now`
    pub fn poll(&self, now: Instant) -> Option<WatchdogEvent> {
        let expired = |deadline: Option<Instant>| deadline.is_some_and(|d| now >= d);

        if expired(self.response_deadline) {
            Some(WatchdogEvent::ResponseTimeout)
        } else if expired(self.ping_deadline) {
            Some(WatchdogEvent::KeepaliveTimeout)
        } else if expired(self.idle_deadline) {
            Some(WatchdogEvent::Ping)
        } else {
            None
        }
    }

    /// Disarm everything; called on disconnect
    pub fn reset(&mut self) {
        self.response_deadline = None;
        self.idle_deadline = None;
        self.ping_deadline = None;
    }

    pub fn response_deadline(&self) -> Option<Instant> {
        self.response_deadline
    }

    pub fn ping_outstanding(&self) -> bool {
        self.ping_deadline.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.response_deadline.is_none() && self.idle_deadline.is_none() && self.ping_deadline.is_none()
    }
}

impl Default for TimeoutWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TIMEOUT, Some(DEFAULT_KEEPALIVE_INTERVAL))
    }
}
