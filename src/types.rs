//! Core types exchanged with the pool and with collaborators
//!
//! Jobs arrive from the pool, job results come from the hashing backend and
//! submit results track one share between send and acknowledgement.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Smallest blob a pool may send, in bytes
pub const MIN_BLOB_SIZE: usize = 76;

/// Largest blob accepted, in bytes
pub const MAX_BLOB_SIZE: usize = 96;

/// Job identifiers must be shorter than this
pub const MAX_JOB_ID_LEN: usize = 64;

/// Offset of the 32-bit nonce inside the blob
pub const NONCE_OFFSET: usize = 39;

/// Identifier of one outgoing request that expects a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Id reserved for the login request; never issued by the sequence
    pub const LOGIN: RequestId = RequestId(0);

    /// Get the numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier issued by the pool at login
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcId(String);

impl RpcId {
    /// Create an rpc id, rejecting empty strings
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::malformed("empty rpc id"));
        }
        Ok(Self(id))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pools send the id as a string or a bare number
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::new(s.clone()),
            Value::Number(n) => Self::new(n.to_string()),
            _ => Err(Error::malformed("rpc id is neither string nor number")),
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Unconnected,
    ResolvingHost,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::ResolvingHost => "resolving-host",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Unit of work pushed by the pool
///
/// A job is never updated in place: each notification builds a new one and
/// the previous instance is dropped.
#[derive(Debug, Clone)]
pub struct Job {
    pool_id: i32,
    id: String,
    blob: Vec<u8>,
    target: u64,
    nicehash: bool,
}

impl Job {
    /// Parse a job object as sent in a login result or `job` notification
    ///
    /// `nicehash` is the session flag negotiated through extensions; a blob
    /// with a non-zero nonce turns it on for this job regardless.
    pub fn from_params(pool_id: i32, params: &Value, nicehash: bool) -> Result<Self> {
        let obj = params
            .as_object()
            .ok_or_else(|| Error::invalid_job("params not an object"))?;

        let id = obj
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_job("missing job_id"))?;
        let blob = obj
            .get("blob")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_job("missing blob"))?;
        let target = obj
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_job("missing target"))?;

        Self::new(pool_id, id, blob, target, nicehash)
    }

    /// Build a job from its hex encoded fields
    pub fn new(pool_id: i32, id: &str, blob_hex: &str, target_hex: &str, nicehash: bool) -> Result<Self> {
        if id.is_empty() || id.len() >= MAX_JOB_ID_LEN {
            return Err(Error::invalid_job(format!("bad job_id length {}", id.len())));
        }

        let blob = parse_blob(blob_hex)?;
        let target = parse_target(target_hex)?;
        let nicehash = nicehash || blob[NONCE_OFFSET..NONCE_OFFSET + 4] != [0u8; 4];

        Ok(Self {
            pool_id,
            id: id.to_string(),
            blob,
            target,
            nicehash,
        })
    }

    /// Id of the client that received the job
    pub fn pool_id(&self) -> i32 {
        self.pool_id
    }

    /// Pool-assigned job id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hashing blob
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// 64-bit share target
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Share difficulty implied by the target
    pub fn diff(&self) -> u64 {
        to_diff(self.target)
    }

    /// Pool fixes the top nonce byte for this job
    pub fn is_nicehash(&self) -> bool {
        self.nicehash
    }

    /// Pool-wide nonce boundary, if the pool reserved the top nonce byte
    pub fn nonce_boundary(&self) -> Option<u8> {
        self.nicehash.then(|| self.blob[NONCE_OFFSET + 3])
    }
}

/// Jobs are the same work when id and blob agree
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.blob == other.blob
    }
}

impl Eq for Job {}

fn parse_blob(hex_str: &str) -> Result<Vec<u8>> {
    if hex_str.len() % 2 != 0 {
        return Err(Error::invalid_job("blob has odd length"));
    }

    let size = hex_str.len() / 2;
    if !(MIN_BLOB_SIZE..=MAX_BLOB_SIZE).contains(&size) {
        return Err(Error::invalid_job(format!("blob size {} out of range", size)));
    }

    hex::decode(hex_str).map_err(|e| Error::invalid_job(format!("blob: {}", e)))
}

/// Decode a pool target
///
/// Up to 8 hex chars is the compact 32-bit form, up to 16 the full 64-bit
/// form. Both are little-endian byte strings.
pub fn parse_target(hex_str: &str) -> Result<u64> {
    let bytes = hex::decode(hex_str).map_err(|e| Error::invalid_job(format!("target: {}", e)))?;

    let target = match bytes.len() {
        1..=4 => {
            let mut word = [0u8; 4];
            word[..bytes.len()].copy_from_slice(&bytes);
            let compact = u32::from_le_bytes(word) as u64;
            if compact == 0 {
                return Err(Error::invalid_job("zero target"));
            }
            u64::MAX / (u32::MAX as u64 / compact)
        }
        5..=8 => {
            let mut word = [0u8; 8];
            word[..bytes.len()].copy_from_slice(&bytes);
            u64::from_le_bytes(word)
        }
        _ => return Err(Error::invalid_job(format!("target length {}", hex_str.len()))),
    };

    if target == 0 {
        return Err(Error::invalid_job("zero target"));
    }
    Ok(target)
}

/// Difficulty for a 64-bit target
pub fn to_diff(target: u64) -> u64 {
    if target == 0 {
        return 0;
    }
    u64::MAX / target
}

/// Share found by the hashing backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Job the share belongs to
    pub job_id: String,
    /// Winning nonce
    pub nonce: u32,
    /// Resulting hash
    pub result: [u8; 32],
    /// Difficulty of the job when the share was found
    pub diff: u64,
}

impl JobResult {
    /// Create a job result
    pub fn new(job_id: impl Into<String>, nonce: u32, result: [u8; 32], diff: u64) -> Self {
        Self {
            job_id: job_id.into(),
            nonce,
            result,
            diff,
        }
    }

    /// Nonce as sent on the wire: 4 little-endian bytes in hex
    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce.to_le_bytes())
    }

    /// Hash as sent on the wire
    pub fn result_hex(&self) -> String {
        hex::encode(self.result)
    }

    /// Difficulty actually reached by this hash
    pub fn actual_diff(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.result[24..32]);
        to_diff(u64::from_le_bytes(tail))
    }
}

/// One submitted share awaiting its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub request_id: RequestId,
    pub diff: u64,
    pub actual_diff: u64,
    submitted_at: Instant,
    elapsed: Option<Duration>,
}

impl SubmitResult {
    /// Start tracking a share sent at `now`
    pub fn new(request_id: RequestId, diff: u64, actual_diff: u64, now: Instant) -> Self {
        Self {
            request_id,
            diff,
            actual_diff,
            submitted_at: now,
            elapsed: None,
        }
    }

    /// Record response arrival
    pub fn done(&mut self, now: Instant) {
        self.elapsed = Some(now.saturating_duration_since(self.submitted_at));
    }

    /// Round-trip latency, once the response arrived
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// When the share was sent
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}
