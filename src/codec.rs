//! Line protocol framing and JSON-RPC message codec
//!
//! The pool speaks newline-delimited JSON in both directions. Incoming bytes
//! are accumulated in a fixed-capacity [`RecvBuffer`]; a line that cannot fit
//! is a framing error rather than a reason to grow. Outgoing requests are
//! serialized into a [`SendBuffer`] with the same kind of ceiling.

use crate::types::{JobResult, RequestId, RpcId};
use crate::url::PoolUrl;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

/// Default receive buffer size in bytes
pub const DEFAULT_RECV_CAPACITY: usize = 2048;

/// Default send buffer size in bytes
pub const DEFAULT_SEND_CAPACITY: usize = 768;

/// Smallest buffers that still hold a login exchange
pub const MIN_BUFFER_CAPACITY: usize = 256;

const LINE_TERMINATOR: u8 = b'\n';
const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_LOGIN: &str = "login";
pub const METHOD_SUBMIT: &str = "submit";
pub const METHOD_KEEPALIVE: &str = "keepalived";
pub const METHOD_JOB: &str = "job";
pub const METHOD_EXTENSIONS: &str = "extensions";

/// Fixed-capacity accumulator that splits a byte stream into lines
#[derive(Debug)]
pub struct RecvBuffer {
    buf: Box<[u8]>,
    len: usize,
}

impl RecvBuffer {
    /// Create a buffer holding at most `capacity` bytes of one line
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Maximum bytes a pending line may occupy
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes of the incomplete trailing line currently held
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Append a chunk and collect every line it completes
    ///
    /// Lines are pushed to `lines` without their terminator (and without a
    /// trailing `\r`); empty lines are skipped. Lines completed before an
    /// overflow are still delivered, then `Error::Framing` is returned and
    /// the buffer is emptied.
    pub fn feed(&mut self, mut chunk: &[u8], lines: &mut Vec<Bytes>) -> Result<()> {
        while !chunk.is_empty() {
            let space = self.buf.len() - self.len;
            let n = space.min(chunk.len());
            let scan_from = self.len;

            self.buf[self.len..self.len + n].copy_from_slice(&chunk[..n]);
            self.len += n;
            chunk = &chunk[n..];

            self.extract_lines(scan_from, lines);

            if self.len == self.buf.len() {
                self.len = 0;
                return Err(Error::Framing {
                    capacity: self.buf.len(),
                });
            }
        }
        Ok(())
    }

    fn extract_lines(&mut self, scan_from: usize, lines: &mut Vec<Bytes>) {
        let mut start = 0;
        let mut pos = scan_from;

        while let Some(offset) = self.buf[pos..self.len]
            .iter()
            .position(|&b| b == LINE_TERMINATOR)
        {
            let end = pos + offset;
            let line = trim_line(&self.buf[start..end]);
            if !line.is_empty() {
                lines.push(Bytes::copy_from_slice(line));
            }
            start = end + 1;
            pos = start;
        }

        if start > 0 {
            self.buf.copy_within(start..self.len, 0);
            self.len -= start;
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Fixed-capacity buffer for outgoing requests
#[derive(Debug)]
pub struct SendBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl SendBuffer {
    /// Create a buffer for messages of at most `capacity` bytes, terminator included
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum encoded message size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize `msg` as one terminated line
    pub fn encode<T: Serialize>(&mut self, msg: &T) -> Result<Bytes> {
        self.buf.clear();

        let mut writer = BoundedWriter {
            buf: &mut self.buf,
            capacity: self.capacity.saturating_sub(1),
            needed: 0,
        };

        if let Err(e) = serde_json::to_writer(&mut writer, msg) {
            let needed = writer.needed;
            self.buf.clear();
            if e.is_io() {
                return Err(Error::MessageTooLarge {
                    len: needed + 1,
                    capacity: self.capacity,
                });
            }
            return Err(Error::Json(e));
        }

        self.buf.put_u8(LINE_TERMINATOR);
        Ok(self.buf.split().freeze())
    }
}

struct BoundedWriter<'a> {
    buf: &'a mut BytesMut,
    capacity: usize,
    needed: usize,
}

impl io::Write for BoundedWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let needed = self.buf.len() + data.len();
        if needed > self.capacity {
            self.needed = needed;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "send buffer full"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Error object attached to a pool message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolError {
    pub code: i64,
    pub message: String,
}

impl PoolError {
    /// Interpret the `error` member
    ///
    /// Accepts the `{"code", "message"}` object form as well as the stratum
    /// style `[code, "message", data]` array and bare strings. `null`, booleans
    /// and numbers carry no message and mean no error.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(obj) => Some(Self {
                code: obj.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            Value::Array(arr) => Some(Self {
                code: arr.first().and_then(Value::as_i64).unwrap_or(-1),
                message: arr
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            Value::String(s) => Some(Self {
                code: -1,
                message: s.clone(),
            }),
            Value::Bool(_) | Value::Number(_) => None,
        }
    }
}

/// Decoded incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reply to one of our requests
    Response {
        id: RequestId,
        result: Option<Value>,
        error: Option<PoolError>,
    },
    /// Unsolicited message from the pool
    Notification {
        method: String,
        params: Value,
        error: Option<PoolError>,
    },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

/// Decode one line into a message
///
/// Anything that is not a JSON object carrying a method or an integer id is
/// reported as `Error::Malformed`.
pub fn decode_line(line: &[u8]) -> Result<Message> {
    let raw: RawMessage = serde_json::from_slice(line)
        .map_err(|e| Error::malformed(format!("JSON decode failed: {}", e)))?;

    if let Some(method) = raw.method {
        return Ok(Message::Notification {
            method,
            params: raw.params,
            error: PoolError::from_value(&raw.error),
        });
    }

    if raw.id.is_null() {
        return Err(Error::malformed("message has neither id nor method"));
    }

    let id = raw
        .id
        .as_u64()
        .ok_or_else(|| Error::malformed(format!("non-integer id {}", raw.id)))?;

    Ok(Message::Response {
        id: RequestId(id),
        result: (!raw.result.is_null()).then_some(raw.result),
        error: PoolError::from_value(&raw.error),
    })
}

/// Outgoing JSON-RPC request envelope
#[derive(Debug, Serialize)]
pub struct Request<'a, P> {
    pub id: RequestId,
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P: Serialize> Request<'a, P> {
    pub fn new(id: RequestId, method: &'a str, params: P) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginParams<'a> {
    pub login: &'a str,
    pub pass: &'a str,
    pub agent: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SubmitParams<'a> {
    pub id: &'a str,
    pub job_id: &'a str,
    pub nonce: String,
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct KeepaliveParams<'a> {
    pub id: &'a str,
}

/// Receive and send halves of the protocol for one connection
#[derive(Debug)]
pub struct ProtocolCodec {
    recv: RecvBuffer,
    send: SendBuffer,
}

impl ProtocolCodec {
    /// Create a codec with explicit buffer ceilings
    pub fn new(recv_capacity: usize, send_capacity: usize) -> Self {
        Self {
            recv: RecvBuffer::with_capacity(recv_capacity),
            send: SendBuffer::with_capacity(send_capacity),
        }
    }

    /// Frame a received chunk into lines
    pub fn feed(&mut self, chunk: &[u8], lines: &mut Vec<Bytes>) -> Result<()> {
        self.recv.feed(chunk, lines)
    }

    /// Forget any partial line from a previous connection
    pub fn reset(&mut self) {
        self.recv.reset();
    }

    /// Receive buffer, for inspection
    pub fn recv_buffer(&self) -> &RecvBuffer {
        &self.recv
    }

    /// Encode the login request for the reserved login slot
    pub fn encode_login(&mut self, url: &PoolUrl, agent: &str) -> Result<Bytes> {
        let params = LoginParams {
            login: url.user(),
            pass: url.password(),
            agent,
        };
        self.send
            .encode(&Request::new(RequestId::LOGIN, METHOD_LOGIN, params))
    }

    /// Encode a share submission
    pub fn encode_submit(
        &mut self,
        id: RequestId,
        rpc_id: &RpcId,
        result: &JobResult,
    ) -> Result<Bytes> {
        let params = SubmitParams {
            id: rpc_id.as_str(),
            job_id: &result.job_id,
            nonce: result.nonce_hex(),
            result: result.result_hex(),
        };
        self.send.encode(&Request::new(id, METHOD_SUBMIT, params))
    }

    /// Encode a keepalive ping
    pub fn encode_keepalive(&mut self, id: RequestId, rpc_id: &RpcId) -> Result<Bytes> {
        let params = KeepaliveParams { id: rpc_id.as_str() };
        self.send.encode(&Request::new(id, METHOD_KEEPALIVE, params))
    }
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new(DEFAULT_RECV_CAPACITY, DEFAULT_SEND_CAPACITY)
    }
}
