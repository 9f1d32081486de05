//! Per-session context-window usage estimates and threshold warnings.
//!
//! Token counts are an estimate of `ceil(len/4)` per added message,
//! accumulated per session against a 200 000-token window. The monitor is
//! advisory: it never blocks a turn, it only tells the executor when to
//! warn the user. A periodic sweep drops monitor entries for sessions idle
//! past a threshold; actual session lifecycle stays with the manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Context window size the estimates are compared against.
pub const CONTEXT_LIMIT_TOKENS: u64 = 200_000;

/// Usage ratio at which a warning is emitted.
pub const WARNING_RATIO: f64 = 0.80;

/// Usage ratio at which the warning escalates to critical.
pub const CRITICAL_RATIO: f64 = 0.95;

/// Interval between idle-entry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Severity of a context usage advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSeverity {
    /// Usage is at or past 80% of the window.
    Warning,
    /// Usage is at or past 95% of the window.
    Critical,
}

#[derive(Debug, Clone)]
struct ContextEntry {
    estimated_tokens: u64,
    messages: u64,
    turn_count: u64,
    last_activity: DateTime<Utc>,
}

/// Usage snapshot for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Estimated tokens consumed so far.
    pub estimated_tokens: u64,
    /// Messages recorded.
    pub messages: u64,
    /// Turns recorded.
    pub turn_count: u64,
}

/// Per-session token usage monitor.
pub struct ContextMonitor {
    entries: Mutex<HashMap<String, ContextEntry>>,
    idle_threshold: Duration,
}

impl ContextMonitor {
    /// Create a monitor with the default 60-minute idle threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_threshold(Duration::from_secs(3600))
    }

    /// Create a monitor with a custom idle threshold.
    #[must_use]
    pub fn with_idle_threshold(idle_threshold: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_threshold,
        }
    }

    /// Estimate the token cost of a message.
    #[must_use]
    pub fn estimate_tokens(content: &str) -> u64 {
        (content.len() as u64).div_ceil(4)
    }

    /// Record a message for `session_id` and return an advisory if the
    /// session crossed a usage threshold.
    pub fn record_message(&self, session_id: &str, content: &str) -> Option<ContextSeverity> {
        let tokens = Self::estimate_tokens(content);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(session_id.to_owned())
            .or_insert_with(|| ContextEntry {
                estimated_tokens: 0,
                messages: 0,
                turn_count: 0,
                last_activity: Utc::now(),
            });
        entry.estimated_tokens += tokens;
        entry.messages += 1;
        entry.last_activity = Utc::now();

        let ratio = usage_ratio(entry.estimated_tokens);
        if ratio >= CRITICAL_RATIO {
            Some(ContextSeverity::Critical)
        } else if ratio >= WARNING_RATIO {
            Some(ContextSeverity::Warning)
        } else {
            None
        }
    }

    /// Record the start of a turn for `session_id`.
    pub fn record_turn(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(session_id) {
            entry.turn_count += 1;
            entry.last_activity = Utc::now();
        }
    }

    /// Current token estimate for a session (0 if untracked).
    #[must_use]
    pub fn estimated_tokens(&self, session_id: &str) -> u64 {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(session_id)
            .map_or(0, |entry| entry.estimated_tokens)
    }

    /// Usage snapshot for a session, if tracked.
    #[must_use]
    pub fn stats(&self, session_id: &str) -> Option<ContextStats> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(session_id).map(|entry| ContextStats {
            estimated_tokens: entry.estimated_tokens,
            messages: entry.messages,
            turn_count: entry.turn_count,
        })
    }

    /// Drop the monitor entry for a disposed session.
    pub fn forget(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(session_id);
    }

    /// Remove entries idle past the threshold; returns how many were evicted.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.idle_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.last_activity >= cutoff);
        before - entries.len()
    }
}

impl Default for ContextMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Usage ratio clamped to 1.0.
#[must_use]
pub fn usage_ratio(estimated_tokens: u64) -> f64 {
    (estimated_tokens as f64 / CONTEXT_LIMIT_TOKENS as f64).min(1.0)
}

/// Spawn the periodic idle sweep task.
///
/// Runs every 10 minutes until `cancel` fires. Eviction here is advisory
/// bookkeeping only — sessions themselves are owned by the manager.
#[must_use]
pub fn spawn_sweep_task(monitor: Arc<ContextMonitor>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("context monitor sweep: cancellation received, stopping");
                    break;
                }

                _ = interval.tick() => {
                    let evicted = monitor.sweep_idle();
                    if evicted > 0 {
                        info!(evicted, "context monitor: evicted idle entries");
                    }
                }
            }
        }
    })
}
