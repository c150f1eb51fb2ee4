//! Request identifiers and in-flight share tracking
//!
//! Request ids come from one process-wide sequence shared by every client so
//! that a response can never be mistaken for a reply to a request sent on an
//! earlier connection. [`SubmitTracker`] maps the ids of outstanding submits
//! to their [`SubmitResult`] until the pool answers or the connection drops.

use crate::types::{JobResult, RequestId, SubmitResult};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

static GLOBAL_SEQUENCE: Lazy<Arc<RequestSequence>> = Lazy::new(|| Arc::new(RequestSequence::new()));

/// Monotonic source of request ids
///
/// Starts at 1 (0 is the login slot) and saturates at `u64::MAX`: once the
/// last id has been issued every further call fails instead of wrapping.
#[derive(Debug)]
pub struct RequestSequence {
    next: AtomicU64,
}

impl RequestSequence {
    /// Fresh sequence starting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Sequence whose next id is `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    /// The sequence shared by all clients in this process
    pub fn global() -> Arc<RequestSequence> {
        Arc::clone(&GLOBAL_SEQUENCE)
    }

    /// Issue the next id
    pub fn next_id(&self) -> Result<RequestId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map(RequestId)
            .map_err(|_| Error::SequenceExhausted)
    }

    /// Id the next call would return, if any
    pub fn peek(&self) -> Option<RequestId> {
        let n = self.next.load(Ordering::Relaxed);
        (n != u64::MAX).then_some(RequestId(n))
    }
}

impl Default for RequestSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation map of submitted shares awaiting a response
#[derive(Debug, Default)]
pub struct SubmitTracker {
    pending: HashMap<RequestId, SubmitResult>,
}

impl SubmitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a share sent under `id`
    pub fn track(&mut self, id: RequestId, result: &JobResult, now: Instant) {
        let entry = SubmitResult::new(id, result.diff, result.actual_diff(), now);
        self.pending.insert(id, entry);
    }

    /// Take the entry for a response, stamping its latency
    pub fn complete(&mut self, id: RequestId, now: Instant) -> Option<SubmitResult> {
        let mut entry = self.pending.remove(&id)?;
        entry.done(now);
        Some(entry)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything; called when the owning connection closes
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
