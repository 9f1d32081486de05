//! Three-state circuit breaker around backend agent calls.
//!
//! `CLOSED → OPEN → HALF_OPEN → CLOSED`. Failures accumulate in CLOSED and
//! trip the breaker at the threshold; OPEN fails fast with
//! [`AppError::CircuitOpen`] until the reopen deadline; HALF_OPEN admits
//! probes and closes again after enough consecutive successes.
//!
//! The clock is injectable so transition tests need no real sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{AppError, Result};

/// Injectable time source.
pub type ClockFn = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Breaker tuning parameters.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive-equivalent failure count that trips the breaker.
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN required to close.
    pub success_threshold: u32,
    /// How long OPEN lasts before a probe is admitted.
    pub open_timeout: Duration,
    /// Failures older than this decay one per call.
    pub monitoring_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            success_threshold: 3,
            open_timeout: Duration::from_secs(10),
            monitoring_window: Duration::from_secs(120),
        }
    }
}

/// Breaker state, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls fail fast until the reopen deadline.
    Open,
    /// Probe calls are admitted; any failure re-opens.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    reopen_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// Shared three-state failure detector.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: ClockFn,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration and the system clock.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(Instant::now))
    }

    /// Create a breaker with an injected clock (test seam).
    #[must_use]
    pub fn with_clock(config: BreakerConfig, clock: ClockFn) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                reopen_at: None,
                last_failure_at: None,
            }),
            clock,
        }
    }

    /// Current state, for diagnostics.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `f` through the breaker.
    ///
    /// # Errors
    ///
    /// - [`AppError::CircuitOpen`] without invoking `f` while OPEN.
    /// - Whatever `f` returns otherwise; failures are recorded.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Check admission without running a call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CircuitOpen`] while the breaker is OPEN.
    pub fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Open => Err(AppError::CircuitOpen),
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.failures = inner.failures.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    info!("circuit breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.reopen_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = (self.clock)();
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.last_failure_at = Some(now);
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failures,
                        "circuit breaker opened: backend failing"
                    );
                    inner.state = BreakerState::Open;
                    inner.reopen_at = Some(now + self.config.open_timeout);
                    inner.successes = 0;
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker re-opened: probe failed");
                inner.state = BreakerState::Open;
                inner.reopen_at = Some(now + self.config.open_timeout);
                inner.successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Force the breaker OPEN (test hook).
    pub fn force_open(&self) {
        let now = (self.clock)();
        let mut inner = self.lock();
        inner.state = BreakerState::Open;
        inner.reopen_at = Some(now + self.config.open_timeout);
        inner.successes = 0;
    }

    /// Force the breaker CLOSED and reset counters (test hook).
    pub fn force_closed(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.reopen_at = None;
    }

    /// Apply time-driven transitions: OPEN → HALF_OPEN and failure decay.
    fn refresh(&self, inner: &mut BreakerInner) {
        let now = (self.clock)();

        if inner.state == BreakerState::Open {
            if let Some(reopen_at) = inner.reopen_at {
                if now >= reopen_at {
                    info!("circuit breaker half-open: admitting probe calls");
                    inner.state = BreakerState::HalfOpen;
                    inner.successes = 0;
                }
            }
        }

        // Failures older than the monitoring window decay one per call.
        if inner.state == BreakerState::Closed && inner.failures > 0 {
            if let Some(last) = inner.last_failure_at {
                if now.saturating_duration_since(last) > self.config.monitoring_window {
                    inner.failures -= 1;
                    inner.last_failure_at = Some(now);
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
