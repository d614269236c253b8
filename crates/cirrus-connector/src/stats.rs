//! Dispatcher counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct DispatcherStatsCounters {
    requests_issued: AtomicU64,
    sends_completed: AtomicU64,
    send_failures: AtomicU64,
    replies_delivered: AtomicU64,
    replies_dropped: AtomicU64,
    cancellations: AtomicU64,
    orphaned: AtomicU64,
}

impl DispatcherStatsCounters {
    pub(crate) fn record_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send(&self, ok: bool) {
        if ok {
            self.sends_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reply(&self, matched: bool) {
        if matched {
            self.replies_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.replies_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_cancel(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphans(&self, count: usize) {
        self.orphaned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            sends_completed: self.sends_completed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            replies_delivered: self.replies_delivered.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a dispatcher's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Requests given a token and registered
    pub requests_issued: u64,
    /// Requests handed to the transport
    pub sends_completed: u64,
    /// Requests that failed before reaching the transport
    pub send_failures: u64,
    /// Replies matched to a pending request
    pub replies_delivered: u64,
    /// Replies with no matching request
    pub replies_dropped: u64,
    /// Requests cancelled by the caller
    pub cancellations: u64,
    /// Requests still unanswered when the connector shut down
    pub orphaned: u64,
}
