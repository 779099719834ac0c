//! Request telemetry: a bounded, purely observational log of every dispatch.
//!
//! Entries are created when a request goes out and completed when the response
//! or error comes back; once completed they are never mutated. The buffer is a
//! fixed-capacity FIFO ring, so the oldest entry is evicted on overflow.
//! Nothing recorded here affects a request's outcome.

mod redact;

pub use redact::{REDACTED, redact_value};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde::Serialize;

/// One logged request. Body snapshots are redacted before they get here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    /// Wall time of the attempt; `None` while the request is in flight.
    pub duration_ms: Option<u64>,
    /// HTTP status; `None` while in flight or when the transport failed.
    pub status: Option<u16>,
    /// Response body size in bytes, when known.
    pub size: Option<u64>,
    /// Redacted request body snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Handle for an in-flight entry, returned by [`RequestLog::begin`].
#[derive(Debug)]
pub struct PendingEntry {
    id: u64,
    started: Instant,
}

/// Fixed-capacity ring buffer of request log entries.
pub struct RequestLog {
    capacity: usize,
    next_id: AtomicU64,
    entries: Mutex<VecDeque<RequestLogEntry>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a dispatch. The entry enters the buffer immediately; the
    /// returned handle completes it later.
    pub fn begin(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> PendingEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = RequestLogEntry {
            id,
            timestamp: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            duration_ms: None,
            status: None,
            size: None,
            body: body.map(redact_value),
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);

        PendingEntry {
            id,
            started: Instant::now(),
        }
    }

    /// Complete an entry with the attempt's outcome.
    ///
    /// A no-op if the entry was already evicted by newer traffic.
    pub fn complete(&self, pending: PendingEntry, status: Option<StatusCode>, size: Option<u64>) {
        let duration = pending.started.elapsed();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == pending.id) {
            entry.duration_ms = Some(duration.as_millis() as u64);
            entry.status = status.map(|s| s.as_u16());
            entry.size = size;
        }
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<RequestLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Completed entries with the given HTTP status.
    pub fn with_status(&self, status: u16) -> Vec<RequestLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status == Some(status))
            .cloned()
            .collect()
    }

    /// Completed entries that took longer than `threshold`.
    pub fn slower_than(&self, threshold: Duration) -> Vec<RequestLogEntry> {
        let threshold_ms = threshold.as_millis() as u64;
        self.entries
            .lock()
            .iter()
            .filter(|e| e.duration_ms.is_some_and(|d| d > threshold_ms))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Serialize the whole log as pretty JSON, oldest entry first.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries())
    }
}

impl std::fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
