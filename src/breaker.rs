//! Circuit Breaker
//!
//! One breaker per cache instance, guarding loader execution in the compute
//! operations. Closed calls run normally; after `failure_threshold`
//! consecutive failures the breaker opens and rejects calls until
//! `recovery_timeout` elapses, then lets a single trial through (half-open).
//! Callers hold a [`PermitGuard`] while the loader runs; a guard dropped
//! without reporting (cancelled future, panicking loader) releases the trial.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker for permission to run a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Run the loader and report the result
    Allowed,
    /// Do not run the loader; the breaker reopens to a trial after `retry_in`
    Rejected { retry_in: Duration },
}

/// Point-in-time view of the breaker for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub mode: BreakerMode,
    pub consecutive_failures: u32,
    pub failures_in_window: usize,
    /// Failures per second over the monitoring window
    pub failure_rate: f64,
    pub since_last_failure: Option<Duration>,
    /// Time until a trial call is allowed, when open
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    window: Duration,
    mode: BreakerMode,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trial_in_flight: bool,
    failure_log: VecDeque<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
            window: config.monitoring_window,
            mode: BreakerMode::Closed,
            consecutive_failures: 0,
            last_failure: None,
            next_attempt: None,
            trial_in_flight: false,
            failure_log: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> BreakerMode {
        self.mode
    }

    // == Acquire ==
    /// Decides whether a loader may run now.
    ///
    /// An open breaker whose recovery timeout has passed moves to half-open
    /// and grants exactly one trial; other callers are rejected until that
    /// trial reports back.
    pub fn acquire(&mut self, now: Instant) -> Permit {
        match self.mode {
            BreakerMode::Closed => Permit::Allowed,
            BreakerMode::Open => {
                let next = self.next_attempt.unwrap_or(now);
                if now < next {
                    Permit::Rejected {
                        retry_in: next - now,
                    }
                } else {
                    info!("circuit breaker half-open, allowing trial call");
                    self.mode = BreakerMode::HalfOpen;
                    self.trial_in_flight = true;
                    Permit::Allowed
                }
            }
            BreakerMode::HalfOpen => {
                if self.trial_in_flight {
                    Permit::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    self.trial_in_flight = true;
                    Permit::Allowed
                }
            }
        }
    }

    // == Record Outcome ==
    pub fn record_success(&mut self) {
        if self.mode != BreakerMode::Closed {
            info!("circuit breaker closed after successful trial");
        }
        self.mode = BreakerMode::Closed;
        self.consecutive_failures = 0;
        self.next_attempt = None;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.failure_log.push_back(now);
        self.prune(now);

        let trip = match self.mode {
            BreakerMode::HalfOpen => true,
            BreakerMode::Closed => self.consecutive_failures >= self.failure_threshold,
            BreakerMode::Open => false,
        };
        if trip {
            warn!(
                failures = self.consecutive_failures,
                recovery_ms = self.recovery_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
            self.mode = BreakerMode::Open;
            self.next_attempt = Some(now + self.recovery_timeout);
        }
        self.trial_in_flight = false;
    }

    /// Releases a permit whose call never reported an outcome.
    ///
    /// An abandoned half-open trial counts as a failed trial and reopens the
    /// breaker. Abandoned closed-mode calls are not counted.
    pub fn abandon(&mut self, now: Instant) {
        if self.mode == BreakerMode::HalfOpen && self.trial_in_flight {
            warn!("half-open trial abandoned before reporting");
            self.record_failure(now);
        }
    }

    // == Failure Rate ==
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.failure_log.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.failure_log.pop_front();
            } else {
                break;
            }
        }
    }

    /// Failures recorded within the monitoring window ending at `now`.
    pub fn failures_in_window(&self, now: Instant) -> usize {
        self.failure_log
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) <= self.window)
            .count()
    }

    /// Failures per second over the monitoring window.
    pub fn failure_rate(&self, now: Instant) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.failures_in_window(now) as f64 / secs
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        BreakerSnapshot {
            mode: self.mode,
            consecutive_failures: self.consecutive_failures,
            failures_in_window: self.failures_in_window(now),
            failure_rate: self.failure_rate(now),
            since_last_failure: self.last_failure.map(|at| now.saturating_duration_since(at)),
            retry_in: match self.mode {
                BreakerMode::Open => self.next_attempt.map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
        }
    }
}

// == Permit Guard ==
/// A granted permit. Report the loader outcome with [`PermitGuard::succeed`]
/// or [`PermitGuard::fail`]; dropping it unreported abandons the call.
#[derive(Debug)]
pub struct PermitGuard<'a> {
    breaker: Option<&'a Mutex<CircuitBreaker>>,
    settled: bool,
}

impl<'a> PermitGuard<'a> {
    /// Asks `breaker` for a permit. Without a breaker every call is allowed.
    ///
    /// Returns the time until a trial is allowed when rejected.
    pub fn acquire(
        breaker: Option<&'a Mutex<CircuitBreaker>>,
        now: Instant,
    ) -> Result<Self, Duration> {
        if let Some(breaker) = breaker {
            if let Permit::Rejected { retry_in } = breaker.lock().acquire(now) {
                return Err(retry_in);
            }
        }
        Ok(Self {
            breaker,
            settled: false,
        })
    }

    pub fn succeed(mut self) {
        self.settled = true;
        if let Some(breaker) = self.breaker {
            breaker.lock().record_success();
        }
    }

    pub fn fail(mut self, now: Instant) {
        self.settled = true;
        if let Some(breaker) = self.breaker {
            breaker.lock().record_failure(now);
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(breaker) = self.breaker {
            breaker.lock().abandon(Instant::now());
        }
    }
}
