//! Error handling for the mining pool client
//!
//! One error type covers configuration, the wire protocol and the session
//! lifecycle. Connection-level failures are additionally tagged with a
//! [`CloseReason`] when they end a session.

use std::fmt;
use thiserror::Error;

/// Result type alias for pool client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining pool client
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Pool URL could not be parsed
    #[error("Invalid pool URL: {message}")]
    InvalidUrl { message: String },

    /// Job fields rejected during validation
    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    /// A received line does not fit in the receive buffer
    #[error("Line exceeds receive buffer ({capacity} bytes)")]
    Framing { capacity: usize },

    /// An outgoing request does not fit in the send buffer
    #[error("Message of {len} bytes exceeds send buffer ({capacity} bytes)")]
    MessageTooLarge { len: usize, capacity: usize },

    /// Valid line with an unexpected JSON shape
    #[error("Malformed message: {message}")]
    Malformed { message: String },

    /// Submit attempted without an authenticated session
    #[error("Client not ready: {message}")]
    NotReady { message: String },

    /// The process-wide request sequence has no identifiers left
    #[error("Request sequence exhausted")]
    SequenceExhausted,

    /// Name resolution or socket errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Pool reported an error that does not forbid reconnecting
    #[error("Pool error: {message}")]
    Protocol { message: String },

    /// Pool reported an authentication or ban class error
    #[error("Critical pool error: {message}")]
    Critical { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Event loop is gone
    #[error("Event loop closed")]
    LoopClosed,
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Create an invalid job error
    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a transient protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a critical protocol error
    pub fn critical(message: impl Into<String>) -> Self {
        Self::Critical {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if the failure is worth another connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Framing { .. }
                | Error::Network { .. }
                | Error::Protocol { .. }
                | Error::Timeout { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::InvalidUrl { .. } => "url",
            Error::InvalidJob { .. } => "job",
            Error::Framing { .. } => "framing",
            Error::MessageTooLarge { .. } => "encode",
            Error::Malformed { .. } => "malformed",
            Error::NotReady { .. } => "not_ready",
            Error::SequenceExhausted => "sequence",
            Error::Network { .. } => "network",
            Error::Protocol { .. } => "protocol",
            Error::Critical { .. } => "critical",
            Error::Timeout { .. } => "timeout",
            Error::LoopClosed => "loop_closed",
        }
    }

    /// Close reason to report when this error ends a session
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Error::Framing { .. } => CloseReason::FramingError,
            Error::Critical { .. } => CloseReason::Critical,
            Error::Timeout { .. } => CloseReason::Timeout,
            Error::Network { .. } => CloseReason::ConnectError,
            Error::Io(_) => CloseReason::IoError,
            _ => CloseReason::ProtocolError,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Local `disconnect()` or teardown
    Graceful,
    /// Host lookup failed or produced no usable address
    ResolveError,
    /// Every address candidate refused or timed out
    ConnectError,
    /// Pool closed the socket
    PeerClosed,
    /// Socket read or write failed
    IoError,
    /// A line overflowed the receive buffer
    FramingError,
    /// Pool error, failed login or protocol violation
    ProtocolError,
    /// Pool told us not to come back
    Critical,
    /// Response or keepalive watchdog expired
    Timeout,
}

impl CloseReason {
    /// Stable tag used in logs and close events
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Graceful => "graceful",
            CloseReason::ResolveError => "resolve-error",
            CloseReason::ConnectError => "connect-error",
            CloseReason::PeerClosed => "peer-closed",
            CloseReason::IoError => "io-error",
            CloseReason::FramingError => "framing-error",
            CloseReason::ProtocolError => "protocol-error",
            CloseReason::Critical => "critical",
            CloseReason::Timeout => "timeout",
        }
    }

    /// True for reasons that count as a failed session
    pub fn is_failure(&self) -> bool {
        !matches!(self, CloseReason::Graceful)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
