//! Callbacks the client invokes on its owner
//!
//! A [`ClientListener`] is called synchronously from the event loop thread,
//! so implementations must return quickly. [`ChannelListener`] forwards every
//! callback as a [`PoolEvent`] for owners that prefer to consume a stream.

use crate::error::CloseReason;
use crate::reconnect::ReconnectDecision;
use crate::types::{Job, SessionState, SubmitResult};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

/// Why and how a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub reason: CloseReason,
    /// Detail text, e.g. the pool's error message
    pub message: Option<String>,
    /// Consecutive failed sessions, this one included
    pub failures: u64,
    pub reconnect: ReconnectDecision,
}

/// Counters surfaced for pool health decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub state: SessionState,
    pub jobs_received: u64,
    pub sent: u64,
    pub failures: u64,
    pub pending_submits: usize,
}

/// Receiver of client events
pub trait ClientListener: Send {
    /// Login accepted; `job` is the first job of the session
    fn on_login_success(&mut self, client_id: i32, job: &Job);

    /// A new job became current
    fn on_job_received(&mut self, client_id: i32, job: &Job);

    /// The pool answered a submit; `error` is set when it was rejected
    fn on_result_accepted(&mut self, client_id: i32, result: &SubmitResult, error: Option<&str>);

    /// The session ended
    fn on_close(&mut self, client_id: i32, event: &CloseEvent);

    /// Periodic counters
    fn on_health(&mut self, _client_id: i32, _report: &HealthReport) {}
}

/// Listener that drops everything; installed on clients pending removal
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentListener;

impl ClientListener for SilentListener {
    fn on_login_success(&mut self, _client_id: i32, _job: &Job) {}
    fn on_job_received(&mut self, _client_id: i32, _job: &Job) {}
    fn on_result_accepted(&mut self, _client_id: i32, _result: &SubmitResult, _error: Option<&str>) {}
    fn on_close(&mut self, _client_id: i32, _event: &CloseEvent) {}
}

/// Listener callbacks as owned values
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    LoginSuccess { client_id: i32, job: Job },
    Job { client_id: i32, job: Job },
    SubmitResult {
        client_id: i32,
        result: SubmitResult,
        error: Option<String>,
    },
    Closed { client_id: i32, event: CloseEvent },
    Health { client_id: i32, report: HealthReport },
}

/// Forwards callbacks over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<PoolEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<PoolEvent>) -> Self {
        Self { tx }
    }

    /// Listener plus the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: PoolEvent) {
        if self.tx.send(event).is_err() {
            trace!("Pool event receiver dropped");
        }
    }
}

impl ClientListener for ChannelListener {
    fn on_login_success(&mut self, client_id: i32, job: &Job) {
        self.send(PoolEvent::LoginSuccess {
            client_id,
            job: job.clone(),
        });
    }

    fn on_job_received(&mut self, client_id: i32, job: &Job) {
        self.send(PoolEvent::Job {
            client_id,
            job: job.clone(),
        });
    }

    fn on_result_accepted(&mut self, client_id: i32, result: &SubmitResult, error: Option<&str>) {
        self.send(PoolEvent::SubmitResult {
            client_id,
            result: result.clone(),
            error: error.map(str::to_string),
        });
    }

    fn on_close(&mut self, client_id: i32, event: &CloseEvent) {
        self.send(PoolEvent::Closed {
            client_id,
            event: event.clone(),
        });
    }

    fn on_health(&mut self, client_id: i32, report: &HealthReport) {
        self.send(PoolEvent::Health {
            client_id,
            report: *report,
        });
    }
}

/// Logs every event; used by the command-line binary
#[derive(Debug, Default)]
pub struct LoggingListener {
    accepted: u64,
    rejected: u64,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted and rejected share totals
    pub fn shares(&self) -> (u64, u64) {
        (self.accepted, self.rejected)
    }
}

impl ClientListener for LoggingListener {
    fn on_login_success(&mut self, client_id: i32, job: &Job) {
        info!(client_id, job_id = job.id(), "Login succeeded");
    }

    fn on_job_received(&mut self, client_id: i32, job: &Job) {
        info!(
            client_id,
            job_id = job.id(),
            diff = job.diff(),
            nicehash = job.is_nicehash(),
            "New job"
        );
    }

    fn on_result_accepted(&mut self, client_id: i32, result: &SubmitResult, error: Option<&str>) {
        let latency_ms = result.elapsed().map(|d| d.as_millis() as u64).unwrap_or(0);
        match error {
            None => {
                self.accepted += 1;
                info!(
                    client_id,
                    request_id = %result.request_id,
                    diff = result.diff,
                    latency_ms,
                    "Share accepted ({}/{})",
                    self.accepted,
                    self.rejected
                );
            }
            Some(reason) => {
                self.rejected += 1;
                warn!(
                    client_id,
                    request_id = %result.request_id,
                    latency_ms,
                    "Share rejected: {} ({}/{})",
                    reason,
                    self.accepted,
                    self.rejected
                );
            }
        }
    }

    fn on_close(&mut self, client_id: i32, event: &CloseEvent) {
        warn!(
            client_id,
            reason = %event.reason,
            failures = event.failures,
            reconnect = %event.reconnect,
            "Connection closed{}",
            event
                .message
                .as_deref()
                .map(|m| format!(": {}", m))
                .unwrap_or_default()
        );
    }

    fn on_health(&mut self, client_id: i32, report: &HealthReport) {
        info!(
            client_id,
            state = %report.state,
            jobs = report.jobs_received,
            sent = report.sent,
            failures = report.failures,
            pending = report.pending_submits,
            "Pool health"
        );
    }
}
