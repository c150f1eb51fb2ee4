//! Configuration management for the mining pool client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults. Values
//! given explicitly on the command line or in the environment win over the
//! file; everything else is taken from the file when it sets it.

use crate::client::{ClientOptions, PrefixMatcher, DEFAULT_CRITICAL_ERRORS};
use crate::codec::MIN_BUFFER_CAPACITY;
use crate::event_loop::LoopSettings;
use crate::url::PoolUrl;
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive usable in an `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Console log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    Plain,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete configuration for the pool client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "mining-pool-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mining pool connection client",
    long_about = "Connects to a mining pool over line-delimited JSON-RPC, logs in, follows jobs and keeps the session alive"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(skip)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Pool address: host:port or stratum+tcp://[user:pass@]host:port
    #[arg(short = 'o', long, value_name = "URL")]
    #[serde(default)]
    pub url: Option<String>,

    /// Login name, usually the wallet address
    #[arg(short = 'u', long, env = "MINING_POOL_USER")]
    #[serde(default)]
    pub user: Option<String>,

    /// Login password
    #[arg(short = 'p', long, env = "MINING_POOL_PASS")]
    #[serde(default)]
    pub pass: Option<String>,

    /// Agent string sent at login
    #[arg(long)]
    #[serde(default)]
    pub agent: Option<String>,

    /// Pause before reconnecting, in milliseconds
    #[arg(long, default_value = "5000")]
    #[serde(default = "default_retry_pause")]
    pub retry_pause: u64,

    /// Time allowed for a login or submit response, in milliseconds
    #[arg(long, default_value = "10000")]
    #[serde(default = "default_response_timeout")]
    pub response_timeout: u64,

    /// Idle time before a keepalive ping, in milliseconds
    #[arg(long, default_value = "60000")]
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Never send keepalive pings
    #[arg(long)]
    #[serde(default)]
    pub no_keepalive: bool,

    /// Bound on resolving and connecting, in milliseconds
    #[arg(long, default_value = "20000")]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Timer resolution, in milliseconds
    #[arg(long, default_value = "1000")]
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,

    /// Health report interval in milliseconds, 0 disables
    #[arg(long, default_value = "60000")]
    #[serde(default = "default_health_interval")]
    pub health_interval: u64,

    /// Receive buffer size in bytes
    #[arg(long, default_value = "2048")]
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,

    /// Send buffer size in bytes
    #[arg(long, default_value = "768")]
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    /// Pool error prefix that stops reconnecting (repeatable)
    #[arg(long = "critical-error", value_name = "PREFIX")]
    #[serde(default)]
    pub critical_errors: Vec<String>,

    /// Log connection errors at debug level
    #[arg(short = 'q', long)]
    #[serde(default)]
    pub quiet: bool,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Console log format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write logs to this file, rotated daily
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Parse the process arguments and merge the config file, if any
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Same as [`Config::load`] for an explicit argument list
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_matches(&matches).await
    }

    async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        // Load from config file if specified
        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config, |id| is_explicit(matches, id));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge file values into everything not set explicitly
    fn merge_with_file(mut self, file: Self, explicit: impl Fn(&str) -> bool) -> Self {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if !explicit(stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        take!(
            retry_pause,
            response_timeout,
            keepalive,
            no_keepalive,
            connect_timeout,
            tick_interval,
            health_interval,
            recv_buffer,
            send_buffer,
            quiet,
            log_level,
            log_format,
        );

        // Credentials and paths: keep CLI values, fall back to the file
        self.url = self.url.or(file.url);
        self.user = self.user.or(file.user);
        self.pass = self.pass.or(file.pass);
        self.agent = self.agent.or(file.agent);
        self.log_file = self.log_file.or(file.log_file);
        if self.critical_errors.is_empty() {
            self.critical_errors = file.critical_errors;
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.url.is_some() {
            self.pool_url()?;
        }

        if self.tick_interval == 0 {
            return Err(Error::config("Tick interval must be greater than 0"));
        }

        if self.response_timeout == 0 {
            return Err(Error::config("Response timeout must be greater than 0"));
        }

        if !self.no_keepalive && self.keepalive == 0 {
            return Err(Error::config(
                "Keepalive interval must be greater than 0 (use --no-keepalive to disable)",
            ));
        }

        if self.recv_buffer < MIN_BUFFER_CAPACITY {
            return Err(Error::config(format!(
                "Receive buffer must be at least {} bytes",
                MIN_BUFFER_CAPACITY
            )));
        }

        if self.send_buffer < MIN_BUFFER_CAPACITY {
            return Err(Error::config(format!(
                "Send buffer must be at least {} bytes",
                MIN_BUFFER_CAPACITY
            )));
        }

        Ok(())
    }

    /// Get the pool address with credentials applied
    pub fn pool_url(&self) -> Result<PoolUrl> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::config("Pool URL is required (-o/--url)"))?;

        PoolUrl::parse_with_credentials(
            url,
            self.user.as_deref().unwrap_or_default(),
            self.pass.as_deref().unwrap_or_default(),
        )
        .map_err(|e| Error::config(e.to_string()))
    }

    /// Get keepalive interval, `None` when disabled
    pub fn keepalive_duration(&self) -> Option<Duration> {
        (!self.no_keepalive).then(|| Duration::from_millis(self.keepalive))
    }

    /// Get health report interval, `None` when disabled
    pub fn health_interval_duration(&self) -> Option<Duration> {
        (self.health_interval > 0).then(|| Duration::from_millis(self.health_interval))
    }

    /// Get runtime options for a client
    pub fn client_options(&self) -> ClientOptions {
        let critical = if self.critical_errors.is_empty() {
            PrefixMatcher::new(DEFAULT_CRITICAL_ERRORS)
        } else {
            PrefixMatcher::new(&self.critical_errors)
        };

        ClientOptions {
            agent: self.agent.clone().unwrap_or_else(ClientOptions::default_agent),
            retry_pause: Duration::from_millis(self.retry_pause),
            response_timeout: Duration::from_millis(self.response_timeout),
            keepalive: self.keepalive_duration(),
            health_interval: self.health_interval_duration(),
            recv_capacity: self.recv_buffer,
            send_capacity: self.send_buffer,
            quiet: self.quiet,
            critical: Arc::new(critical),
        }
    }

    /// Get event loop settings
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            tick_interval: Duration::from_millis(self.tick_interval),
            connect_timeout: Duration::from_millis(self.connect_timeout),
            ..LoopSettings::default()
        }
    }
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
    )
}

// Default value functions for serde
fn default_retry_pause() -> u64 { 5000 }
fn default_response_timeout() -> u64 { 10000 }
fn default_keepalive() -> u64 { 60000 }
fn default_connect_timeout() -> u64 { 20000 }
fn default_tick_interval() -> u64 { 1000 }
fn default_health_interval() -> u64 { 60000 }
fn default_recv_buffer() -> usize { 2048 }
fn default_send_buffer() -> usize { 768 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
