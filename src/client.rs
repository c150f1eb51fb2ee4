//! Pool session state machine
//!
//! [`Client`] performs no I/O itself. It asks a [`Transport`] to resolve,
//! connect, write and close, and the owner feeds the outcomes back through
//! [`Client::handle_event`] together with the connection epoch they belong
//! to. Timers advance only when the owner calls [`Client::tick`].
//!
//! ```text
//! Unconnected -> ResolvingHost -> Connecting -> Connected -> Closing -> Unconnected
//!                     |               |
//!                     +---------------+-------> Unconnected (resolve/connect error)
//! ```

use crate::codec::{decode_line, Message, PoolError, ProtocolCodec, METHOD_EXTENSIONS, METHOD_JOB};
use crate::codec::{DEFAULT_RECV_CAPACITY, DEFAULT_SEND_CAPACITY};
use crate::error::CloseReason;
use crate::listener::{ClientListener, CloseEvent, HealthReport, SilentListener};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, DEFAULT_RETRY_PAUSE};
use crate::tracker::{RequestSequence, SubmitTracker};
use crate::types::{Job, JobResult, RequestId, RpcId, SessionState};
use crate::url::PoolUrl;
use crate::watchdog::{TimeoutWatchdog, WatchdogEvent, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_RESPONSE_TIMEOUT};
use crate::{Error, Result};
use bytes::Bytes;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Connection attempt counter; events from an older epoch are dropped
pub type Epoch = u64;

/// Error prefixes that mean the pool does not want us back
pub const DEFAULT_CRITICAL_ERRORS: &[&str] = &["Unauthenticated", "your IP is banned", "IP Address currently banned"];

/// Socket operations the client requests
///
/// Every call is tagged with the epoch of the session it belongs to. After
/// `resolve` the transport reports one [`NetEvent::Resolved`]; after
/// `connect` one [`NetEvent::Connected`]. Once a connection is up, `close`
/// is answered by exactly one [`NetEvent::Closed`]. Closing an epoch that
/// never connected produces no event.
pub trait Transport {
    fn resolve(&mut self, epoch: Epoch, host: &str, port: u16);
    fn connect(&mut self, epoch: Epoch, addr: SocketAddr);
    fn write(&mut self, epoch: Epoch, data: Bytes) -> Result<()>;
    fn close(&mut self, epoch: Epoch);
}

/// Outcome of a transport operation
#[derive(Debug)]
pub enum NetEvent {
    Resolved(io::Result<Vec<SocketAddr>>),
    Connected(io::Result<()>),
    Read(Bytes),
    Eof,
    ReadError(io::Error),
    WriteError(io::Error),
    Closed,
}

/// Decides whether a pool error message is critical
pub trait CriticalErrorMatcher: Send + Sync {
    fn is_critical(&self, message: &str) -> bool;
}

impl<F> CriticalErrorMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_critical(&self, message: &str) -> bool {
        self(message)
    }
}

/// Case-insensitive prefix match against a list of messages
#[derive(Debug, Clone)]
pub struct PrefixMatcher {
    prefixes: Vec<String>,
}

impl PrefixMatcher {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl Default for PrefixMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_ERRORS)
    }
}

impl CriticalErrorMatcher for PrefixMatcher {
    fn is_critical(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.prefixes.iter().any(|p| message.starts_with(p.as_str()))
    }
}

/// Tunables for one client
#[derive(Clone)]
pub struct ClientOptions {
    pub agent: String,
    pub retry_pause: Duration,
    pub response_timeout: Duration,
    /// `None` disables keepalive pings
    pub keepalive: Option<Duration>,
    pub health_interval: Option<Duration>,
    pub recv_capacity: usize,
    pub send_capacity: usize,
    pub quiet: bool,
    pub critical: Arc<dyn CriticalErrorMatcher>,
}

impl ClientOptions {
    /// Agent string sent at login when none is configured
    pub fn default_agent() -> String {
        format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            agent: Self::default_agent(),
            retry_pause: DEFAULT_RETRY_PAUSE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            keepalive: Some(DEFAULT_KEEPALIVE_INTERVAL),
            health_interval: None,
            recv_capacity: DEFAULT_RECV_CAPACITY,
            send_capacity: DEFAULT_SEND_CAPACITY,
            quiet: false,
            critical: Arc::new(PrefixMatcher::default()),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("agent", &self.agent)
            .field("retry_pause", &self.retry_pause)
            .field("response_timeout", &self.response_timeout)
            .field("keepalive", &self.keepalive)
            .field("health_interval", &self.health_interval)
            .field("recv_capacity", &self.recv_capacity)
            .field("send_capacity", &self.send_capacity)
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

/// Connection to one mining pool
pub struct Client<T> {
    id: i32,
    transport: T,
    listener: Box<dyn ClientListener>,
    critical: Arc<dyn CriticalErrorMatcher>,
    agent: String,
    health_interval: Option<Duration>,
    quiet: bool,

    url: Option<PoolUrl>,
    tag: String,
    state: SessionState,
    epoch: Epoch,
    candidates: VecDeque<SocketAddr>,
    ip: Option<SocketAddr>,
    pending_close: Option<(CloseReason, Option<String>)>,
    pending_connect: Option<PoolUrl>,

    codec: ProtocolCodec,
    lines: Vec<Bytes>,
    sequence: Arc<RequestSequence>,
    tracker: SubmitTracker,
    watchdog: TimeoutWatchdog,
    reconnect: ReconnectPolicy,

    login_pending: bool,
    keepalive_id: Option<RequestId>,
    rpc_id: Option<RpcId>,
    job: Option<Job>,
    nicehash: bool,

    jobs_received: u64,
    sent: u64,
    next_health: Option<Instant>,
}

impl<T: Transport> Client<T> {
    /// Create an unconnected client
    pub fn new(id: i32, options: ClientOptions, transport: T, listener: Box<dyn ClientListener>) -> Self {
        Self {
            id,
            transport,
            listener,
            critical: options.critical,
            agent: options.agent,
            health_interval: options.health_interval,
            quiet: options.quiet,
            url: None,
            tag: String::new(),
            state: SessionState::Unconnected,
            epoch: 0,
            candidates: VecDeque::new(),
            ip: None,
            pending_close: None,
            pending_connect: None,
            codec: ProtocolCodec::new(options.recv_capacity, options.send_capacity),
            lines: Vec::new(),
            sequence: RequestSequence::global(),
            tracker: SubmitTracker::new(),
            watchdog: TimeoutWatchdog::new(options.response_timeout, options.keepalive),
            reconnect: ReconnectPolicy::new(options.retry_pause),
            login_pending: false,
            keepalive_id: None,
            rpc_id: None,
            job: None,
            nicehash: false,
            jobs_received: 0,
            sent: 0,
            next_health: None,
        }
    }

    /// Draw request ids from `sequence` instead of the process-wide one
    pub fn with_sequence(mut self, sequence: Arc<RequestSequence>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn url(&self) -> Option<&PoolUrl> {
        self.url.as_ref()
    }

    /// Current job of the session
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn rpc_id(&self) -> Option<&RpcId> {
        self.rpc_id.as_ref()
    }

    /// Address of the current or last attempted connection
    pub fn ip(&self) -> Option<SocketAddr> {
        self.ip
    }

    pub fn failures(&self) -> u64 {
        self.reconnect.failures()
    }

    /// Logged in with no failure since
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Connected && self.rpc_id.is_some() && self.reconnect.failures() == 0
    }

    /// Submits awaiting a response
    pub fn pending_submits(&self) -> usize {
        self.tracker.len()
    }

    /// Next scheduled reconnect
    pub fn next_reconnect(&self) -> Option<Instant> {
        self.reconnect.next_attempt()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            state: self.state,
            jobs_received: self.jobs_received,
            sent: self.sent,
            failures: self.reconnect.failures(),
            pending_submits: self.tracker.len(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Demote connection error logs to debug
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn set_retry_pause(&mut self, pause: Duration) {
        self.reconnect.set_retry_pause(pause);
    }

    /// Suppress (or release) automatic reconnects
    pub fn set_dormancy(&mut self, dormant: bool, now: Instant) {
        if let Some(at) = self.reconnect.set_dormancy(dormant, now) {
            debug!("[{}] dormancy cleared, reconnect in {:?}", self.tag, at - now);
        }
    }

    /// Stop delivering events; used before removal
    pub fn silence(&mut self) {
        self.listener = Box::new(SilentListener);
    }

    /// Start a session with `url`
    ///
    /// While the previous session is still closing the request is held and
    /// issued once the close completes. In any other busy state it is ignored
    /// and the current url is kept.
    pub fn connect(&mut self, url: PoolUrl) {
        match self.state {
            SessionState::Unconnected => {
                self.tag = url.to_string();
                self.url = Some(url);
                self.connect_current();
            }
            SessionState::Closing => {
                debug!("[{}] connect to {} deferred until close completes", self.tag, url);
                self.pending_connect = Some(url);
            }
            state => debug!("[{}] connect to {} ignored in state {}", self.tag, url, state),
        }
    }

    /// Start a session with the last url
    pub fn connect_current(&mut self) {
        if self.state != SessionState::Unconnected {
            debug!("[{}] connect ignored in state {}", self.tag, self.state);
            return;
        }

        let Some(url) = &self.url else {
            warn!("connect requested without a pool url");
            return;
        };

        self.reconnect.cancel();
        self.epoch += 1;
        self.state = SessionState::ResolvingHost;
        debug!("[{}] resolving host", self.tag);
        self.transport.resolve(self.epoch, url.host(), url.port());
    }

    /// Close the session without scheduling a reconnect
    pub fn disconnect(&mut self, now: Instant) {
        self.reconnect.cancel();
        self.pending_connect = None;

        match self.state {
            SessionState::Unconnected => {}
            SessionState::Closing => {
                if let Some((reason, _)) = &mut self.pending_close {
                    *reason = CloseReason::Graceful;
                }
            }
            _ => self.close(CloseReason::Graceful, None, now),
        }
    }

    /// Send a share
    ///
    /// Returns the request id the listener will report the outcome under.
    pub fn submit(&mut self, result: &JobResult, now: Instant) -> Result<RequestId> {
        if self.state != SessionState::Connected {
            return Err(Error::not_ready(format!("session is {}", self.state)));
        }
        let Some(rpc_id) = &self.rpc_id else {
            return Err(Error::not_ready("login not completed"));
        };

        let id = self.sequence.next_id()?;
        let data = self.codec.encode_submit(id, rpc_id, result)?;

        self.tracker.track(id, result, now);
        if !self.send(data, now) {
            return Err(Error::network("write failed"));
        }
        self.watchdog.request_sent(now);

        Ok(id)
    }

    /// Advance timers
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            SessionState::Connected => match self.watchdog.poll(now) {
                Some(WatchdogEvent::ResponseTimeout) => self.fail(Error::timeout("response"), now),
                Some(WatchdogEvent::KeepaliveTimeout) => self.fail(Error::timeout("keepalive"), now),
                Some(WatchdogEvent::Ping) => self.ping(now),
                None => {}
            },
            SessionState::Unconnected => {
                if self.reconnect.take_due(now) {
                    self.connect_current();
                }
            }
            _ => {}
        }

        if let Some(interval) = self.health_interval {
            match self.next_health {
                Some(at) if now >= at => {
                    self.next_health = Some(now + interval);
                    let report = self.health();
                    self.listener.on_health(self.id, &report);
                }
                Some(_) => {}
                None => self.next_health = Some(now + interval),
            }
        }
    }

    /// Feed a transport outcome
    pub fn handle_event(&mut self, epoch: Epoch, event: NetEvent, now: Instant) {
        if epoch != self.epoch {
            trace!("[{}] dropping event for stale epoch {}", self.tag, epoch);
            return;
        }

        match event {
            NetEvent::Resolved(result) => self.on_resolved(result, now),
            NetEvent::Connected(result) => self.on_connected(result, now),
            NetEvent::Read(chunk) => self.on_read(&chunk, now),
            NetEvent::Eof => {
                if self.state == SessionState::Connected {
                    self.connection_error("read error: \"end of file\"");
                    self.close(CloseReason::PeerClosed, Some("connection closed by pool".into()), now);
                }
            }
            NetEvent::ReadError(e) => {
                if self.state == SessionState::Connected {
                    self.connection_error(&format!("read error: \"{}\"", e));
                    self.close(CloseReason::IoError, Some(e.to_string()), now);
                }
            }
            NetEvent::WriteError(e) => {
                if self.state == SessionState::Connected {
                    self.connection_error(&format!("write error: \"{}\"", e));
                    self.close(CloseReason::IoError, Some(e.to_string()), now);
                }
            }
            NetEvent::Closed => self.on_closed(now),
        }
    }

    fn on_resolved(&mut self, result: io::Result<Vec<SocketAddr>>, now: Instant) {
        if self.state != SessionState::ResolvingHost {
            return;
        }

        let addrs = match result {
            Ok(addrs) => addrs,
            Err(e) => {
                self.connection_error(&format!("DNS error: \"{}\"", e));
                self.close(CloseReason::ResolveError, Some(e.to_string()), now);
                return;
            }
        };

        let (mut v4, mut v6): (Vec<_>, Vec<_>) = addrs.into_iter().partition(SocketAddr::is_ipv4);
        if v4.is_empty() && v6.is_empty() {
            self.connection_error("DNS error: \"no usable address\"");
            self.close(CloseReason::ResolveError, Some("no usable address".into()), now);
            return;
        }

        let mut rng = rand::rng();
        v4.shuffle(&mut rng);
        v6.shuffle(&mut rng);

        self.candidates = v4.into_iter().chain(v6).collect();
        self.state = SessionState::Connecting;
        self.try_next_candidate(None, now);
    }

    fn try_next_candidate(&mut self, last_error: Option<String>, now: Instant) {
        match self.candidates.pop_front() {
            Some(addr) => {
                debug!("[{}] connecting to {}", self.tag, addr);
                self.ip = Some(addr);
                self.transport.connect(self.epoch, addr);
            }
            None => {
                let message = last_error.unwrap_or_else(|| "no address left to try".into());
                self.close(CloseReason::ConnectError, Some(message), now);
            }
        }
    }

    fn on_connected(&mut self, result: io::Result<()>, now: Instant) {
        if self.state != SessionState::Connecting {
            return;
        }

        if let Err(e) = result {
            let addr = self.ip.map(|a| a.to_string()).unwrap_or_default();
            self.connection_error(&format!("connect error: \"{}\" ({})", e, addr));
            self.try_next_candidate(Some(e.to_string()), now);
            return;
        }

        self.candidates.clear();
        self.state = SessionState::Connected;
        self.codec.reset();
        debug!("[{}] connected to {:?}", self.tag, self.ip);

        self.login(now);
    }

    fn login(&mut self, now: Instant) {
        let Some(url) = &self.url else {
            return;
        };

        let data = match self.codec.encode_login(url, &self.agent) {
            Ok(data) => data,
            Err(e) => {
                warn!("[{}] {}", self.tag, e);
                self.close(CloseReason::ProtocolError, Some(e.to_string()), now);
                return;
            }
        };

        self.login_pending = true;
        if self.send(data, now) {
            self.watchdog.request_sent(now);
        }
    }

    fn ping(&mut self, now: Instant) {
        let Some(rpc_id) = &self.rpc_id else {
            self.watchdog.postpone_ping(now);
            return;
        };

        let encoded = self
            .sequence
            .next_id()
            .and_then(|id| Ok((id, self.codec.encode_keepalive(id, rpc_id)?)));

        match encoded {
            Ok((id, data)) => {
                if self.send(data, now) {
                    self.keepalive_id = Some(id);
                    self.watchdog.ping_sent(now);
                }
            }
            Err(e) => {
                warn!("[{}] keepalive not sent: {}", self.tag, e);
                self.watchdog.postpone_ping(now);
            }
        }
    }

    fn send(&mut self, data: Bytes, now: Instant) -> bool {
        trace!(
            "[{}] send ({} bytes): \"{}\"",
            self.tag,
            data.len(),
            String::from_utf8_lossy(&data).trim_end()
        );

        match self.transport.write(self.epoch, data) {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(e) => {
                self.connection_error(&format!("send failed: \"{}\"", e));
                self.close(CloseReason::IoError, Some(e.to_string()), now);
                false
            }
        }
    }

    fn on_read(&mut self, chunk: &[u8], now: Instant) {
        if self.state != SessionState::Connected {
            return;
        }

        let mut lines = std::mem::take(&mut self.lines);
        let framed = self.codec.feed(chunk, &mut lines);

        for line in lines.drain(..) {
            if self.state != SessionState::Connected {
                break;
            }
            self.on_line(&line, now);
        }
        self.lines = lines;

        if let Err(e) = framed {
            if self.state == SessionState::Connected {
                self.fail(e, now);
            }
        }
    }

    fn on_line(&mut self, line: &[u8], now: Instant) {
        trace!(
            "[{}] received ({} bytes): \"{}\"",
            self.tag,
            line.len(),
            String::from_utf8_lossy(line)
        );
        self.watchdog.activity(now);

        match decode_line(line) {
            Ok(Message::Response { id, result, error }) => self.on_response(id, result, error, now),
            Ok(Message::Notification { method, params, error }) => {
                self.on_notification(&method, params, error, now)
            }
            Err(e) => warn!("[{}] {}", self.tag, e),
        }
    }

    fn on_response(&mut self, id: RequestId, result: Option<Value>, error: Option<PoolError>, now: Instant) {
        if id == RequestId::LOGIN && self.login_pending {
            self.login_pending = false;
            self.watchdog.response_received(now, self.outstanding());

            match error {
                Some(err) => {
                    debug!("[{}] login rejected, code: {}", self.tag, err.code);
                    let e = self.classify(err);
                    self.fail(e, now);
                }
                None => self.on_login_result(result, now),
            }
            return;
        }

        if self.keepalive_id == Some(id) {
            self.keepalive_id = None;
            self.watchdog.pong_received(now);
            if let Some(err) = error {
                self.pool_error(err, now);
            }
            return;
        }

        if let Some(entry) = self.tracker.complete(id, now) {
            self.watchdog.response_received(now, self.outstanding());

            match error {
                None => self.listener.on_result_accepted(self.id, &entry, None),
                Some(err) => {
                    self.listener.on_result_accepted(self.id, &entry, Some(&err.message));
                    if self.critical.is_critical(&err.message) {
                        self.pool_error(err, now);
                    }
                }
            }
            return;
        }

        match error {
            Some(err) => self.pool_error(err, now),
            None => debug!("[{}] ignoring response for unknown request {}", self.tag, id),
        }
    }

    fn on_login_result(&mut self, result: Option<Value>, now: Instant) {
        let parsed = result
            .ok_or_else(|| Error::protocol("login response without result"))
            .and_then(|result| self.parse_login(&result));

        let (rpc_id, job, nicehash) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.fail(e, now);
                return;
            }
        };

        self.rpc_id = Some(rpc_id);
        self.nicehash = nicehash;
        self.reconnect.on_login_success();
        self.watchdog.start_keepalive(now);
        self.jobs_received += 1;
        debug!("[{}] login succeeded, job {}", self.tag, job.id());

        let job = self.job.insert(job);
        self.listener.on_login_success(self.id, job);
        self.listener.on_job_received(self.id, job);
    }

    fn parse_login(&self, result: &Value) -> Result<(RpcId, Job, bool)> {
        let rpc_id = result
            .get("id")
            .ok_or_else(|| Error::protocol("login response without id"))
            .and_then(RpcId::from_value)?;

        let nicehash = result
            .get("extensions")
            .map(has_nicehash)
            .unwrap_or(false);

        let job = result
            .get("job")
            .ok_or_else(|| Error::protocol("login response without job"))
            .and_then(|params| Job::from_params(self.id, params, nicehash))?;

        Ok((rpc_id, job, nicehash))
    }

    fn on_notification(&mut self, method: &str, params: Value, error: Option<PoolError>, now: Instant) {
        if let Some(err) = error {
            warn!("[{}] error: \"{}\", code: {}", self.tag, err.message, err.code);
            return;
        }

        match method {
            METHOD_JOB => self.on_job(&params, now),
            METHOD_EXTENSIONS => {
                self.nicehash = has_nicehash(&params);
                debug!("[{}] extensions updated, nicehash {}", self.tag, self.nicehash);
            }
            other => warn!("[{}] unsupported method: \"{}\"", self.tag, other),
        }
    }

    fn on_job(&mut self, params: &Value, now: Instant) {
        if self.rpc_id.is_none() {
            debug!("[{}] job before login ignored", self.tag);
            return;
        }

        let job = match Job::from_params(self.id, params, self.nicehash) {
            Ok(job) => job,
            Err(e) => {
                warn!("[{}] {}", self.tag, e);
                return;
            }
        };

        if self.job.as_ref() == Some(&job) {
            warn!("[{}] duplicate job received, reconnect", self.tag);
            self.close(CloseReason::ProtocolError, Some("duplicate job".into()), now);
            return;
        }

        self.jobs_received += 1;
        let job = self.job.insert(job);
        self.listener.on_job_received(self.id, job);
    }

    fn classify(&self, err: PoolError) -> Error {
        if self.critical.is_critical(&err.message) {
            Error::critical(err.message)
        } else {
            Error::protocol(err.message)
        }
    }

    /// Error not tied to a pending submit or login
    fn pool_error(&mut self, err: PoolError, now: Instant) {
        if self.critical.is_critical(&err.message) {
            self.fail(Error::critical(err.message), now);
        } else {
            warn!("[{}] error: \"{}\", code: {}", self.tag, err.message, err.code);
        }
    }

    /// End the session because of `err`
    ///
    /// Retryable failures honour `quiet`; anything else is always logged.
    fn fail(&mut self, err: Error, now: Instant) {
        if err.is_retryable() {
            self.connection_error(&err.to_string());
        } else {
            warn!(category = err.category(), "[{}] {}", self.tag, err);
        }

        let reason = err.close_reason();
        let message = match err {
            Error::Protocol { message } | Error::Critical { message } => message,
            other => other.to_string(),
        };
        self.close(reason, Some(message), now);
    }

    fn outstanding(&self) -> usize {
        self.tracker.len() + usize::from(self.login_pending)
    }

    fn connection_error(&self, message: &str) {
        if self.quiet {
            debug!("[{}] {}", self.tag, message);
        } else {
            warn!("[{}] {}", self.tag, message);
        }
    }

    fn reset_session(&mut self) {
        let dropped = self.tracker.clear();
        if dropped > 0 {
            debug!("[{}] dropped {} pending submits", self.tag, dropped);
        }
        self.watchdog.reset();
        self.codec.reset();
        self.candidates.clear();
        self.login_pending = false;
        self.keepalive_id = None;
        self.rpc_id = None;
        self.job = None;
        self.nicehash = false;
    }

    fn close(&mut self, reason: CloseReason, message: Option<String>, now: Instant) {
        match self.state {
            SessionState::Unconnected | SessionState::Closing => {}
            SessionState::ResolvingHost | SessionState::Connecting => {
                self.transport.close(self.epoch);
                self.reset_session();
                self.finish_close(reason, message, now);
            }
            SessionState::Connected => {
                self.state = SessionState::Closing;
                self.reset_session();
                self.pending_close = Some((reason, message));
                self.transport.close(self.epoch);
            }
        }
    }

    fn on_closed(&mut self, now: Instant) {
        match self.state {
            SessionState::Closing => {
                let (reason, message) = self
                    .pending_close
                    .take()
                    .unwrap_or((CloseReason::PeerClosed, None));
                self.finish_close(reason, message, now);
            }
            SessionState::Connected => {
                self.reset_session();
                self.finish_close(CloseReason::PeerClosed, Some("connection lost".into()), now);
            }
            _ => {}
        }
    }

    fn finish_close(&mut self, reason: CloseReason, message: Option<String>, now: Instant) {
        self.state = SessionState::Unconnected;
        self.pending_close = None;
        self.epoch += 1;

        let reconnect = self.reconnect.on_disconnect(reason, now);
        match reconnect {
            ReconnectDecision::Scheduled(at) => {
                debug!("[{}] closed ({}), reconnect in {:?}", self.tag, reason, at - now);
            }
            decision => info!("[{}] closed ({}), reconnect {}", self.tag, reason, decision),
        }

        let event = CloseEvent {
            reason,
            message,
            failures: self.reconnect.failures(),
            reconnect,
        };
        self.listener.on_close(self.id, &event);

        if let Some(url) = self.pending_connect.take() {
            self.connect(url);
        }
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("url", &self.tag)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("rpc_id", &self.rpc_id)
            .finish_non_exhaustive()
    }
}

fn has_nicehash(extensions: &Value) -> bool {
    extensions
        .as_array()
        .map(|exts| exts.iter().any(|e| e.as_str() == Some("nicehash")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, PoolEvent};
    use crate::types::MIN_BLOB_SIZE;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Resolve { epoch: Epoch, host: String, port: u16 },
        Connect { epoch: Epoch, addr: SocketAddr },
        Write { epoch: Epoch, data: Bytes },
        Close { epoch: Epoch },
    }

    /// Records every request the client makes
    #[derive(Debug, Default)]
    struct MockTransport {
        calls: Vec<Call>,
        fail_writes: bool,
    }

    impl MockTransport {
        fn writes(&self) -> Vec<Value> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Write { data, .. } => serde_json::from_slice(data).ok(),
                    _ => None,
                })
                .collect()
        }

        fn connects(&self) -> Vec<SocketAddr> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Connect { addr, .. } => Some(*addr),
                    _ => None,
                })
                .collect()
        }

        fn resolves(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, Call::Resolve { .. })).count()
        }
    }

    impl Transport for MockTransport {
        fn resolve(&mut self, epoch: Epoch, host: &str, port: u16) {
            self.calls.push(Call::Resolve {
                epoch,
                host: host.to_string(),
                port,
            });
        }

        fn connect(&mut self, epoch: Epoch, addr: SocketAddr) {
            self.calls.push(Call::Connect { epoch, addr });
        }

        fn write(&mut self, epoch: Epoch, data: Bytes) -> Result<()> {
            if self.fail_writes {
                return Err(Error::network("broken pipe"));
            }
            self.calls.push(Call::Write { epoch, data });
            Ok(())
        }

        fn close(&mut self, epoch: Epoch) {
            self.calls.push(Call::Close { epoch });
        }
    }

    const POOL_ADDR: &str = "10.0.0.1:3333";

    fn blob(tag: u8) -> String {
        "07".repeat(39) + "00000000" + &format!("{:02x}", tag).repeat(MIN_BLOB_SIZE - 43)
    }

    fn job_json(id: &str, tag: u8) -> Value {
        json!({"job_id": id, "blob": blob(tag), "target": "b88d0600"})
    }

    fn options() -> ClientOptions {
        ClientOptions {
            retry_pause: Duration::from_millis(500),
            response_timeout: Duration::from_millis(1000),
            keepalive: Some(Duration::from_millis(5000)),
            ..ClientOptions::default()
        }
    }

    fn new_client(options: ClientOptions) -> (Client<MockTransport>, UnboundedReceiver<PoolEvent>) {
        let (listener, rx) = ChannelListener::channel();
        let client = Client::new(0, options, MockTransport::default(), Box::new(listener))
            .with_sequence(Arc::new(RequestSequence::new()));
        (client, rx)
    }

    fn url() -> PoolUrl {
        PoolUrl::new("pool.example.com", 3333, "wallet", "x").unwrap()
    }

    fn feed(client: &mut Client<MockTransport>, line: Value, now: Instant) {
        let mut data = serde_json::to_vec(&line).unwrap();
        data.push(b'\n');
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Read(Bytes::from(data)), now);
    }

    fn establish(client: &mut Client<MockTransport>, now: Instant) {
        client.connect(url());
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Resolved(Ok(vec![POOL_ADDR.parse().unwrap()])), now);
        client.handle_event(epoch, NetEvent::Connected(Ok(())), now);
    }

    fn logged_in(options: ClientOptions, now: Instant) -> (Client<MockTransport>, UnboundedReceiver<PoolEvent>) {
        let (mut client, mut rx) = new_client(options);
        establish(&mut client, now);
        feed(
            &mut client,
            json!({"id": 0, "jsonrpc": "2.0", "error": null,
                   "result": {"id": "7", "job": job_json("A", 1), "extensions": ["keepalive"], "status": "OK"}}),
            now,
        );
        assert_matches!(rx.try_recv(), Ok(PoolEvent::LoginSuccess { .. }));
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Job { .. }));
        (client, rx)
    }

    fn share() -> JobResult {
        JobResult::new("A", 42, [0x11; 32], 1000)
    }

    fn finish_close(client: &mut Client<MockTransport>, now: Instant) {
        assert_eq!(client.state(), SessionState::Closing);
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Closed, now);
        assert_eq!(client.state(), SessionState::Unconnected);
    }

    #[test]
    fn test_connect_resolves_then_logs_in() {
        let now = Instant::now();
        let (mut client, _rx) = new_client(options());

        client.connect(url());
        assert_eq!(client.state(), SessionState::ResolvingHost);
        assert_eq!(
            client.transport().calls[0],
            Call::Resolve {
                epoch: 1,
                host: "pool.example.com".into(),
                port: 3333
            }
        );

        client.handle_event(1, NetEvent::Resolved(Ok(vec![POOL_ADDR.parse().unwrap()])), now);
        assert_eq!(client.state(), SessionState::Connecting);
        assert_eq!(client.ip(), Some(POOL_ADDR.parse().unwrap()));

        client.handle_event(1, NetEvent::Connected(Ok(())), now);
        assert_eq!(client.state(), SessionState::Connected);

        let writes = client.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0]["id"], 0);
        assert_eq!(writes[0]["method"], "login");
        assert_eq!(writes[0]["params"]["login"], "wallet");
        assert!(!client.is_ready());
    }

    #[test]
    fn test_login_then_accepted_submit() {
        let now = Instant::now();
        let (mut client, mut rx) = logged_in(options(), now);

        assert!(client.is_ready());
        assert_eq!(client.rpc_id().map(RpcId::as_str), Some("7"));
        assert_eq!(client.job().map(Job::id), Some("A"));

        let id = client.submit(&share(), now).unwrap();
        assert_eq!(id, RequestId(1));
        assert_eq!(client.pending_submits(), 1);

        let writes = client.transport().writes();
        let submit = writes.last().unwrap();
        assert_eq!(submit["method"], "submit");
        assert_eq!(submit["params"]["id"], "7");
        assert_eq!(submit["params"]["job_id"], "A");

        feed(
            &mut client,
            json!({"id": 1, "jsonrpc": "2.0", "error": null, "result": {"status": "OK"}}),
            now + Duration::from_millis(25),
        );

        assert_matches!(rx.try_recv(), Ok(PoolEvent::SubmitResult { result, error: None, .. }) => {
            assert_eq!(result.request_id, RequestId(1));
            assert_eq!(result.elapsed(), Some(Duration::from_millis(25)));
        });
        assert_eq!(client.pending_submits(), 0);
    }

    #[test]
    fn test_rejected_submit_keeps_session() {
        let now = Instant::now();
        let (mut client, mut rx) = logged_in(options(), now);

        let id = client.submit(&share(), now).unwrap();
        feed(
            &mut client,
            json!({"id": id.value(), "result": null, "error": {"code": -1, "message": "Low difficulty share"}}),
            now,
        );

        assert_matches!(rx.try_recv(), Ok(PoolEvent::SubmitResult { error: Some(e), .. }) => {
            assert_eq!(e, "Low difficulty share");
        });
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[test]
    fn test_submit_requires_login() {
        let now = Instant::now();
        let (mut client, _rx) = new_client(options());

        assert_matches!(client.submit(&share(), now), Err(Error::NotReady { .. }));

        establish(&mut client, now);
        assert_matches!(client.submit(&share(), now), Err(Error::NotReady { .. }));
        assert_eq!(client.pending_submits(), 0);
        assert_eq!(client.transport().writes().len(), 1);
    }

    #[test]
    fn test_login_timeout_schedules_reconnect() {
        let t0 = Instant::now();
        let (mut client, mut rx) = new_client(options());
        establish(&mut client, t0);

        client.tick(t0 + Duration::from_millis(999));
        assert_eq!(client.state(), SessionState::Connected);

        let t1 = t0 + Duration::from_millis(1000);
        client.tick(t1);
        assert_matches!(client.transport().calls.last(), Some(Call::Close { epoch: 1 }));
        finish_close(&mut client, t1);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Timeout);
            assert_eq!(event.failures, 1);
            assert_eq!(event.reconnect, ReconnectDecision::Scheduled(t1 + Duration::from_millis(500)));
            assert_eq!(event.message, Some(Error::timeout("response").to_string()));
        });

        client.tick(t1 + Duration::from_millis(499));
        assert_eq!(client.state(), SessionState::Unconnected);
        client.tick(t1 + Duration::from_millis(500));
        assert_eq!(client.state(), SessionState::ResolvingHost);
        assert_eq!(client.transport().resolves(), 2);
    }

    #[test]
    fn test_dormancy_blocks_reconnect() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        client.set_dormancy(true, t0);
        client.handle_event(client.epoch(), NetEvent::Eof, t0);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::PeerClosed);
            assert_eq!(event.reconnect, ReconnectDecision::Dormant);
        });

        client.tick(t0 + Duration::from_secs(60));
        assert_eq!(client.state(), SessionState::Unconnected);
        assert_eq!(client.transport().resolves(), 1);

        let t1 = t0 + Duration::from_secs(61);
        client.set_dormancy(false, t1);
        client.tick(t1 + Duration::from_millis(500));
        assert_eq!(client.state(), SessionState::ResolvingHost);
    }

    #[test]
    fn test_critical_error_stops_reconnect() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        let id = client.submit(&share(), t0).unwrap();
        feed(
            &mut client,
            json!({"id": id.value(), "error": {"code": -1, "message": "Unauthenticated"}}),
            t0,
        );
        assert_matches!(rx.try_recv(), Ok(PoolEvent::SubmitResult { error: Some(_), .. }));
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Critical);
            assert_eq!(event.reconnect, ReconnectDecision::Stopped);
            assert_eq!(event.message.as_deref(), Some("Unauthenticated"));
        });
        assert_eq!(client.next_reconnect(), None);

        client.tick(t0 + Duration::from_secs(3600));
        assert_eq!(client.state(), SessionState::Unconnected);
    }

    #[test]
    fn test_critical_error_on_unknown_id() {
        let t0 = Instant::now();
        let (mut client, _rx) = logged_in(options(), t0);

        feed(
            &mut client,
            json!({"id": 99, "error": {"code": -1, "message": "your IP is banned"}}),
            t0,
        );
        assert_eq!(client.state(), SessionState::Closing);
    }

    #[test]
    fn test_custom_critical_matcher() {
        let t0 = Instant::now();
        let opts = ClientOptions {
            critical: Arc::new(|msg: &str| msg.contains("go away")),
            ..options()
        };
        let (mut client, mut rx) = logged_in(opts, t0);

        feed(&mut client, json!({"id": 50, "error": {"code": 1, "message": "Unauthenticated"}}), t0);
        assert_eq!(client.state(), SessionState::Connected);

        feed(&mut client, json!({"id": 51, "error": {"code": 1, "message": "please go away"}}), t0);
        finish_close(&mut client, t0);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Critical);
        });
    }

    #[test]
    fn test_login_error_closes() {
        let t0 = Instant::now();
        let (mut client, mut rx) = new_client(options());
        establish(&mut client, t0);

        feed(&mut client, json!({"id": 0, "error": {"code": -1, "message": "Invalid address"}}), t0);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::ProtocolError);
            assert_eq!(event.message.as_deref(), Some("Invalid address"));
            assert!(event.reconnect.is_scheduled());
        });
    }

    #[test]
    fn test_login_without_job_fails() {
        let t0 = Instant::now();
        let (mut client, mut rx) = new_client(options());
        establish(&mut client, t0);

        feed(&mut client, json!({"id": 0, "error": null, "result": {"id": "7"}}), t0);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::ProtocolError);
        });
        assert_eq!(client.rpc_id(), None);
    }

    #[test]
    fn test_stale_response_ignored() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        client.submit(&share(), t0).unwrap();
        feed(&mut client, json!({"id": 12345, "result": {"status": "OK"}}), t0);

        assert_eq!(client.state(), SessionState::Connected);
        assert_eq!(client.pending_submits(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_clears_session() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        client.submit(&share(), t0).unwrap();
        client.submit(&share(), t0).unwrap();
        client.disconnect(t0);

        assert_eq!(client.pending_submits(), 0);
        assert_eq!(client.rpc_id(), None);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Graceful);
            assert_eq!(event.reconnect, ReconnectDecision::Manual);
            assert_eq!(event.failures, 0);
        });

        client.tick(t0 + Duration::from_secs(60));
        assert_eq!(client.state(), SessionState::Unconnected);
    }

    #[test]
    fn test_connect_while_closing_switches_pool() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);
        let backup = PoolUrl::new("backup.example.com", 4444, "wallet", "x").unwrap();

        client.disconnect(t0);
        client.connect(backup.clone());
        assert_eq!(client.state(), SessionState::Closing);
        assert_eq!(client.url(), Some(&url()));

        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Closed, t0);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Graceful);
        });

        assert_eq!(client.state(), SessionState::ResolvingHost);
        assert_eq!(client.url(), Some(&backup));
        assert_eq!(client.transport().resolves(), 2);
        assert_matches!(
            client.transport().calls.last(),
            Some(Call::Resolve { host, port: 4444, .. }) if host == "backup.example.com"
        );
    }

    #[test]
    fn test_connect_while_busy_keeps_url() {
        let t0 = Instant::now();
        let (mut client, _rx) = logged_in(options(), t0);

        client.connect(PoolUrl::new("backup.example.com", 4444, "wallet", "x").unwrap());
        assert_eq!(client.state(), SessionState::Connected);
        assert_eq!(client.url(), Some(&url()));
        assert_eq!(client.transport().resolves(), 1);

        // A later disconnect drops nothing queued
        client.disconnect(t0);
        finish_close(&mut client, t0);
        assert_eq!(client.transport().resolves(), 1);
    }

    #[test]
    fn test_disconnect_discards_deferred_connect() {
        let t0 = Instant::now();
        let (mut client, _rx) = logged_in(options(), t0);

        client.disconnect(t0);
        client.connect(PoolUrl::new("backup.example.com", 4444, "wallet", "x").unwrap());
        client.disconnect(t0);
        finish_close(&mut client, t0);

        assert_eq!(client.transport().resolves(), 1);
        assert_eq!(client.url(), Some(&url()));
    }

    #[test]
    fn test_request_ids_increase_across_reconnects() {
        let t0 = Instant::now();
        let (mut client, _rx) = logged_in(options(), t0);

        let first = client.submit(&share(), t0).unwrap();
        client.disconnect(t0);
        finish_close(&mut client, t0);

        establish(&mut client, t0);
        feed(
            &mut client,
            json!({"id": 0, "result": {"id": "8", "job": job_json("B", 2)}}),
            t0,
        );
        let second = client.submit(&share(), t0).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_oversized_line_is_framing_error() {
        let t0 = Instant::now();
        let opts = ClientOptions {
            recv_capacity: 512,
            ..options()
        };
        let (mut client, mut rx) = logged_in(opts, t0);

        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Read(Bytes::from(vec![b'x'; 600])), t0);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::FramingError);
        });
    }

    #[test]
    fn test_line_split_across_reads() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        let line = format!("{}\n", json!({"method": "job", "params": job_json("B", 2)}));
        let (head, tail) = line.as_bytes().split_at(37);
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Read(Bytes::copy_from_slice(head)), t0);
        assert!(rx.try_recv().is_err());
        client.handle_event(epoch, NetEvent::Read(Bytes::copy_from_slice(tail)), t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Job { job, .. }) => assert_eq!(job.id(), "B"));
        assert_eq!(client.health().jobs_received, 2);
    }

    #[test]
    fn test_duplicate_job_reconnects() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        feed(&mut client, json!({"method": "job", "params": job_json("A", 1)}), t0);
        finish_close(&mut client, t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::ProtocolError);
        });
    }

    #[test]
    fn test_invalid_job_keeps_session() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);

        feed(&mut client, json!({"method": "job", "params": {"job_id": "B", "blob": "00", "target": "ff"}}), t0);
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Read(Bytes::from_static(b"not json at all\n")), t0);
        feed(&mut client, json!({"method": "mystery", "params": {}}), t0);

        assert_eq!(client.state(), SessionState::Connected);
        assert_eq!(client.job().map(Job::id), Some("A"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_extensions_notification_sets_nicehash() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);
        assert!(!client.job().unwrap().is_nicehash());

        feed(&mut client, json!({"method": "extensions", "params": ["nicehash"]}), t0);
        feed(&mut client, json!({"method": "job", "params": job_json("B", 2)}), t0);

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Job { job, .. }) => assert!(job.is_nicehash()));
    }

    #[test]
    fn test_keepalive_ping_and_timeout() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);
        let writes_before = client.transport().writes().len();

        let t1 = t0 + Duration::from_millis(5000);
        client.tick(t1);
        let writes = client.transport().writes();
        assert_eq!(writes.len(), writes_before + 1);
        let ping = writes.last().unwrap();
        assert_eq!(ping["method"], "keepalived");
        assert_eq!(ping["params"]["id"], "7");

        let ping_id = ping["id"].as_u64().unwrap();
        feed(&mut client, json!({"id": ping_id, "result": {"status": "KEEPALIVED"}}), t1);
        client.tick(t1 + Duration::from_millis(4999));
        assert_eq!(client.state(), SessionState::Connected);

        let t2 = t1 + Duration::from_millis(5000);
        client.tick(t2);
        client.tick(t2 + Duration::from_millis(1000));
        finish_close(&mut client, t2);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::Timeout);
        });
    }

    #[test]
    fn test_keepalive_disabled() {
        let t0 = Instant::now();
        let opts = ClientOptions {
            keepalive: None,
            ..options()
        };
        let (mut client, _rx) = logged_in(opts, t0);
        let writes_before = client.transport().writes().len();

        client.tick(t0 + Duration::from_secs(600));
        assert_eq!(client.transport().writes().len(), writes_before);
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[test]
    fn test_prefers_ipv4_and_falls_back() {
        let t0 = Instant::now();
        let (mut client, mut rx) = new_client(options());
        client.connect(url());

        let v6: SocketAddr = "[2001:db8::1]:3333".parse().unwrap();
        let v4a: SocketAddr = "10.0.0.1:3333".parse().unwrap();
        let v4b: SocketAddr = "10.0.0.2:3333".parse().unwrap();
        client.handle_event(1, NetEvent::Resolved(Ok(vec![v6, v4a, v4b])), t0);

        for _ in 0..3 {
            let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
            client.handle_event(1, NetEvent::Connected(Err(refused)), t0);
        }

        let tried = client.transport().connects();
        assert_eq!(tried.len(), 3);
        assert!(tried[0].is_ipv4());
        assert!(tried[1].is_ipv4());
        assert_eq!(tried[2], v6);

        assert_eq!(client.state(), SessionState::Unconnected);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::ConnectError);
        });
    }

    #[test]
    fn test_empty_resolution_is_resolve_error() {
        let t0 = Instant::now();
        let (mut client, mut rx) = new_client(options());
        client.connect(url());
        client.handle_event(1, NetEvent::Resolved(Ok(vec![])), t0);

        assert_eq!(client.state(), SessionState::Unconnected);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::ResolveError);
            assert_eq!(event.failures, 1);
        });
    }

    #[test]
    fn test_stale_epoch_events_dropped() {
        let t0 = Instant::now();
        let (mut client, _rx) = logged_in(options(), t0);
        let old = client.epoch();

        client.disconnect(t0);
        finish_close(&mut client, t0);
        client.connect_current();
        assert!(client.epoch() > old);

        client.handle_event(old, NetEvent::Resolved(Ok(vec![POOL_ADDR.parse().unwrap()])), t0);
        client.handle_event(old, NetEvent::Closed, t0);
        assert_eq!(client.state(), SessionState::ResolvingHost);
    }

    #[test]
    fn test_write_failure_closes() {
        let t0 = Instant::now();
        let (mut client, mut rx) = logged_in(options(), t0);
        client.transport_mut().fail_writes = true;

        assert!(client.submit(&share(), t0).is_err());
        assert_eq!(client.pending_submits(), 0);
        finish_close(&mut client, t0);
        assert_matches!(rx.try_recv(), Ok(PoolEvent::Closed { event, .. }) => {
            assert_eq!(event.reason, CloseReason::IoError);
        });
    }

    #[test]
    fn test_failures_reset_on_login() {
        let t0 = Instant::now();
        let (mut client, _rx) = new_client(options());

        client.connect(url());
        client.handle_event(1, NetEvent::Resolved(Err(io::Error::other("nxdomain"))), t0);
        assert_eq!(client.failures(), 1);

        establish(&mut client, t0);
        feed(&mut client, json!({"id": 0, "result": {"id": "7", "job": job_json("A", 1)}}), t0);
        assert_eq!(client.failures(), 0);
        assert!(client.is_ready());
    }

    #[test]
    fn test_health_reports_on_interval() {
        let t0 = Instant::now();
        let opts = ClientOptions {
            health_interval: Some(Duration::from_secs(10)),
            keepalive: None,
            ..options()
        };
        let (mut client, mut rx) = logged_in(opts, t0);

        client.tick(t0);
        assert!(rx.try_recv().is_err());
        client.tick(t0 + Duration::from_secs(10));

        assert_matches!(rx.try_recv(), Ok(PoolEvent::Health { report, .. }) => {
            assert_eq!(report.state, SessionState::Connected);
            assert_eq!(report.jobs_received, 1);
            assert_eq!(report.sent, 1);
            assert_eq!(report.failures, 0);
        });
    }

    #[test]
    fn test_prefix_matcher() {
        let matcher = PrefixMatcher::default();
        assert!(matcher.is_critical("Unauthenticated"));
        assert!(matcher.is_critical("unauthenticated session"));
        assert!(matcher.is_critical("IP Address currently banned for 600s"));
        assert!(!matcher.is_critical("Low difficulty share"));
        assert!(!matcher.is_critical("Session Unauthenticated"));
    }
}
