//! Mining Pool Client
//!
//! An event-driven client for mining pools speaking line-delimited JSON-RPC:
//! - Login, job notifications and share submission with result matching
//! - Response timeouts and keepalive pings
//! - Automatic reconnect with dormancy and critical-error stop
//! - A sans-I/O session core driven by a single-threaded tokio event loop

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod listener;
pub mod logging;
pub mod reconnect;
pub mod tracker;
pub mod types;
pub mod url;
pub mod watchdog;

pub use client::{Client, ClientOptions, CriticalErrorMatcher, NetEvent, PrefixMatcher, Transport};
pub use config::Config;
pub use error::{CloseReason, Error, Result};
pub use event_loop::{ClientKey, EventLoop, LoopHandle, LoopSettings};
pub use listener::{ChannelListener, ClientListener, CloseEvent, HealthReport, LoggingListener, PoolEvent};
pub use reconnect::ReconnectDecision;
pub use types::*;
pub use crate::url::PoolUrl;

/// Application information
pub const APP_NAME: &str = "mining-pool-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
