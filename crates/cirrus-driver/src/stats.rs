//! Driver counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct DriverStatsCounters {
    accesses: AtomicU64,
    aborts: AtomicU64,
    requests_executed: AtomicU64,
    replies_sent: AtomicU64,
    reply_failures: AtomicU64,
    protocol_violations: AtomicU64,
    sessions_aborted: AtomicU64,
    operations_cancelled: AtomicU64,
}

impl DriverStatsCounters {
    pub(crate) fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply(&self, delivered: bool) {
        if delivered {
            self.replies_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reply_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self, count: usize) {
        self.operations_cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DriverStats {
        DriverStats {
            accesses: self.accesses.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            reply_failures: self.reply_failures.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            operations_cancelled: self.operations_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a driver's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// `ACCESS` requests accepted
    pub accesses: u64,
    /// `ABORTED` requests accepted
    pub aborts: u64,
    /// Domain requests handed to the backend
    pub requests_executed: u64,
    /// Replies written to a session
    pub replies_sent: u64,
    /// Replies the session refused
    pub reply_failures: u64,
    /// Messages rejected as protocol violations
    pub protocol_violations: u64,
    /// Sessions aborted after too many violations
    pub sessions_aborted: u64,
    /// Pending operations cancelled by shutdown
    pub operations_cancelled: u64,
}
