//! Global admission control for sessions, operations, and memory.
//!
//! Counters are atomic; admission is immediate (denial is immediate too —
//! there is no queueing). Memory pressure is sampled from
//! `/proc/self/statm` where available; on other platforms the estimate is
//! zero and admission degrades to the pure counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GuardLimits;
use crate::{AppError, Result};

/// Derived health classification reported on request.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All counters and memory within limits.
    Healthy,
    /// Memory above the warning threshold or slots nearly exhausted.
    Warning,
    /// Memory above the critical threshold or slots exhausted.
    Critical,
}

/// File descriptors assumed held before any session exists (stdio, logs,
/// listener plumbing).
const BASE_FD_ESTIMATE: usize = 16;

/// Estimated descriptors per live session (child stdio pipes).
const FDS_PER_SESSION: usize = 4;

/// Estimated descriptors per in-flight operation.
const FDS_PER_OPERATION: usize = 2;

/// Ceiling for the derived descriptor estimate.
const MAX_FD_ESTIMATE: usize = 1024;

/// Point-in-time guard snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    /// Active sessions.
    pub active_sessions: usize,
    /// In-flight operations.
    pub active_operations: usize,
    /// Derived file-descriptor estimate.
    pub fd_estimate: usize,
    /// Sampled RSS in MiB (0 when unavailable).
    pub rss_mib: u64,
    /// Derived health.
    pub health: HealthStatus,
}

/// Process-wide resource guard.
pub struct ResourceGuard {
    limits: GuardLimits,
    active_sessions: AtomicUsize,
    active_operations: AtomicUsize,
}

impl ResourceGuard {
    /// Create a guard with the given limits.
    #[must_use]
    pub fn new(limits: GuardLimits) -> Self {
        Self {
            limits,
            active_sessions: AtomicUsize::new(0),
            active_operations: AtomicUsize::new(0),
        }
    }

    /// Whether a new operation would currently be admitted.
    #[must_use]
    pub fn can_start_operation(&self) -> bool {
        if self.rss_mib() >= self.limits.memory_critical_mib {
            return false;
        }
        if self.fd_estimate() >= MAX_FD_ESTIMATE {
            return false;
        }
        self.active_operations.load(Ordering::SeqCst) < self.limits.max_concurrent_operations
    }

    /// Reserve an operation slot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] when memory is critical, the
    /// descriptor estimate is exhausted, or all slots are taken.
    pub fn start_operation(&self, id: &str) -> Result<()> {
        let rss = self.rss_mib();
        if rss >= self.limits.memory_critical_mib {
            // No collector to invoke; refuse admission until pressure eases.
            warn!(rss_mib = rss, "memory critical: refusing new operation");
            return Err(AppError::Resource(format!(
                "memory pressure: {rss} MiB resident"
            )));
        }

        let fds = self.fd_estimate();
        if fds >= MAX_FD_ESTIMATE {
            warn!(fd_estimate = fds, "descriptor estimate exhausted");
            return Err(AppError::Resource(format!(
                "descriptor estimate exhausted ({fds})"
            )));
        }

        let mut current = self.active_operations.load(Ordering::SeqCst);
        loop {
            if current >= self.limits.max_concurrent_operations {
                return Err(AppError::Resource(format!(
                    "operation limit reached ({} in flight)",
                    current
                )));
            }
            match self.active_operations.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        debug!(operation = id, "operation slot reserved");
        Ok(())
    }

    /// Release an operation slot. Saturates at zero.
    pub fn finish_operation(&self, id: &str) {
        let prev = self
            .active_operations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        if prev == 0 {
            warn!(operation = id, "finish_operation without matching start");
        } else {
            debug!(operation = id, "operation slot released");
        }
    }

    /// Reserve a session slot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] when the session limit is reached.
    pub fn add_session(&self, id: &str) -> Result<()> {
        let mut current = self.active_sessions.load(Ordering::SeqCst);
        loop {
            if current >= self.limits.max_concurrent_sessions {
                return Err(AppError::Resource(format!(
                    "session limit reached ({current} active)"
                )));
            }
            match self.active_sessions.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        debug!(session_id = id, "session slot reserved");
        Ok(())
    }

    /// Release a session slot. Saturates at zero.
    pub fn remove_session(&self, id: &str) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        debug!(session_id = id, "session slot released");
    }

    /// Point-in-time snapshot for diagnostics and health probes.
    #[must_use]
    pub fn snapshot(&self) -> GuardSnapshot {
        let sessions = self.active_sessions.load(Ordering::SeqCst);
        let operations = self.active_operations.load(Ordering::SeqCst);
        let rss = self.rss_mib();

        let health = if rss >= self.limits.memory_critical_mib
            || operations >= self.limits.max_concurrent_operations
            || sessions >= self.limits.max_concurrent_sessions
        {
            HealthStatus::Critical
        } else if rss >= self.limits.memory_warning_mib
            || operations * 10 >= self.limits.max_concurrent_operations * 8
            || sessions * 10 >= self.limits.max_concurrent_sessions * 8
        {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        GuardSnapshot {
            active_sessions: sessions,
            active_operations: operations,
            fd_estimate: self.fd_estimate(),
            rss_mib: rss,
            health,
        }
    }

    /// Configured limits, for diagnostics.
    #[must_use]
    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    /// Derived descriptor estimate from the live counters.
    #[must_use]
    pub fn fd_estimate(&self) -> usize {
        BASE_FD_ESTIMATE
            + self.active_sessions.load(Ordering::SeqCst) * FDS_PER_SESSION
            + self.active_operations.load(Ordering::SeqCst) * FDS_PER_OPERATION
    }

    /// Resident set size in MiB, best effort.
    fn rss_mib(&self) -> u64 {
        read_statm_rss_pages().map_or(0, |pages| pages * 4096 / (1024 * 1024))
    }
}

/// Resident page count from `/proc/self/statm` (Linux); `None` elsewhere.
fn read_statm_rss_pages() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    statm.split_whitespace().nth(1)?.parse().ok()
}
