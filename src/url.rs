//! Pool address and credentials
//!
//! Accepts `host:port`, `stratum+tcp://host:port` and `tcp://host:port`,
//! optionally with `user:pass@` embedded in the URL form.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Default password sent when none is configured
pub const DEFAULT_PASSWORD: &str = "x";

const SCHEMES: &[&str] = &["stratum+tcp", "tcp"];

/// Immutable pool endpoint plus login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUrl {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl PoolUrl {
    /// Create a pool URL from its parts
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::invalid_url("empty host"));
        }
        if port == 0 {
            return Err(Error::invalid_url("port must be non-zero"));
        }

        Ok(Self {
            host,
            port,
            user: user.into(),
            password: password.into(),
        })
    }

    /// Parse an address and attach credentials
    ///
    /// Credentials embedded in the URL take precedence over the arguments
    /// only when the arguments are empty.
    pub fn parse_with_credentials(s: &str, user: &str, password: &str) -> Result<Self> {
        let mut url = Self::from_str(s)?;
        if !user.is_empty() {
            url.user = user.to_string();
        }
        if !password.is_empty() {
            url.password = password.to_string();
        }
        Ok(url)
    }

    /// Host name or literal address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Login name (usually the wallet address)
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Login password
    pub fn password(&self) -> &str {
        &self.password
    }

    fn parse_scheme(s: &str) -> Result<Self> {
        let parsed =
            ::url::Url::parse(s).map_err(|e| Error::invalid_url(format!("{}: {}", s, e)))?;

        if !SCHEMES.contains(&parsed.scheme()) {
            return Err(Error::invalid_url(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::invalid_url(format!("missing host: {}", s)))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = parsed
            .port()
            .ok_or_else(|| Error::invalid_url(format!("missing port: {}", s)))?;
        let password = parsed.password().unwrap_or(DEFAULT_PASSWORD);

        Self::new(host, port, parsed.username(), password)
    }

    fn parse_host_port(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_url(format!("expected host:port, got {}", s)))?;
        let port: u16 = port
            .parse()
            .map_err(|e| Error::invalid_url(format!("invalid port {}: {}", port, e)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Self::new(host, port, "", DEFAULT_PASSWORD)
    }
}

impl FromStr for PoolUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains("://") {
            Self::parse_scheme(s)
        } else {
            Self::parse_host_port(s)
        }
    }
}

impl fmt::Display for PoolUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
