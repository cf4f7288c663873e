//! Circuit breaker pattern for domain-level failure isolation
//!
//! Each hostname gets its own breaker. Calls go through [`CircuitBreaker::execute`],
//! which races the operation against a fixed timeout and feeds the outcome
//! back into the state machine:
//! - Closed: normal operation, calls proceed
//! - Open: too many failures, calls are rejected until the cooldown expires
//! - `HalfOpen`: one probe at a time; enough successes close the circuit

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};

use super::crawl_types::{ReplicaError, ReplicaResult};
use crate::config::BreakerSettings;
use crate::crawl_events::{BreakerPhase, ReplicationEvent, ReplicationEventBus};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests proceed
    Closed,
    /// Testing after cooldown - one probe at a time
    HalfOpen,
    /// Failing - reject requests until `next_attempt`
    Open,
}

impl From<CircuitState> for BreakerPhase {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self::Closed,
            CircuitState::HalfOpen => Self::HalfOpen,
            CircuitState::Open => Self::Open,
        }
    }
}

/// Point-in-time view of a breaker, for logs and tests
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Remaining cooldown while open
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt: Option<Instant>,
    probe_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
}

/// Failure-isolation state machine for a single hostname
#[derive(Debug)]
pub struct CircuitBreaker {
    domain: String,
    settings: BreakerSettings,
    operation_timeout: Duration,
    inner: Mutex<BreakerInner>,
    events: Option<ReplicationEventBus>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `domain`
    ///
    /// # Arguments
    /// * `settings` - Failure/success thresholds and base cooldown
    /// * `operation_timeout` - Deadline applied to every wrapped operation
    #[must_use]
    pub fn new(domain: impl Into<String>, settings: BreakerSettings, operation_timeout: Duration) -> Self {
        Self {
            domain: domain.into(),
            settings,
            operation_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt: None,
                probe_in_flight: false,
                total_calls: 0,
                total_failures: 0,
            }),
            events: None,
        }
    }

    /// Publish state transitions on `bus`
    #[must_use]
    pub fn with_events(mut self, bus: ReplicationEventBus) -> Self {
        self.events = Some(bus);
        self
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            retry_in: match inner.state {
                CircuitState::Open => inner
                    .next_attempt
                    .map(|at| at.saturating_duration_since(Instant::now())),
                _ => None,
            },
        }
    }

    /// Run `operation` under the breaker
    ///
    /// # Errors
    ///
    /// * `ReplicaError::CircuitOpen` - rejected without running the operation
    /// * `ReplicaError::Timeout` - the operation outlived the breaker timeout
    /// * otherwise the operation's own error
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ReplicaResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ReplicaResult<T>>,
    {
        let probe = self.admit()?;
        let guard = probe.then(|| ProbeGuard(self));

        let result = match tokio::time::timeout(self.operation_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ReplicaError::Timeout(self.operation_timeout)),
        };
        // completed normally; the record_* call below releases the slot
        std::mem::forget(guard);

        match &result {
            Ok(_) => self.record_success(probe),
            Err(e) => self.record_failure(e, probe),
        }
        result
    }

    fn admit(&self) -> ReplicaResult<bool> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let ready = inner.next_attempt.is_none_or(|at| Instant::now() >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    drop(inner);
                    info!(
                        "Circuit breaker transitioning to HALF-OPEN for domain: {}",
                        self.domain
                    );
                    self.publish(CircuitState::Open, CircuitState::HalfOpen);
                    Ok(true)
                } else {
                    debug!("Circuit breaker OPEN, rejecting call for domain: {}", self.domain);
                    Err(ReplicaError::CircuitOpen {
                        domain: self.domain.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ReplicaError::CircuitOpen {
                        domain: self.domain.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    /// `probe` marks the half-open probe; only it may release the probe slot
    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // admitted while closed and finished after the circuit tripped
            CircuitState::HalfOpen if !probe => {}
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.success_count += 1;
                if inner.success_count >= self.settings.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.success_count = 0;
                    inner.next_attempt = None;
                    drop(inner);
                    info!("Circuit breaker CLOSED for domain: {}", self.domain);
                    self.publish(CircuitState::HalfOpen, CircuitState::Closed);
                } else {
                    debug!(
                        "Circuit breaker HALF-OPEN success for domain: {} ({}/{})",
                        self.domain, inner.success_count, self.settings.success_threshold
                    );
                }
            }
            // a call admitted just before another one reopened the circuit
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, error: &ReplicaError, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
        }
        inner.failure_count += 1;
        inner.total_failures += 1;

        let from = inner.state;
        let should_open = match from {
            CircuitState::Closed => inner.failure_count >= self.settings.failure_threshold,
            CircuitState::HalfOpen | CircuitState::Open => true,
        };

        if should_open {
            let backoff = self.backoff_for(inner.failure_count);
            inner.state = CircuitState::Open;
            inner.success_count = 0;
            inner.next_attempt = Some(Instant::now() + backoff);
            let failures = inner.failure_count;
            drop(inner);
            warn!(
                "Circuit breaker OPEN for domain {} after {} failures, retry in {:?}. Last error: {}",
                self.domain, failures, backoff, error
            );
            if from != CircuitState::Open {
                self.publish(from, CircuitState::Open);
            }
        } else {
            debug!(
                "Circuit breaker failure for domain: {} ({}/{}): {}",
                self.domain, inner.failure_count, self.settings.failure_threshold, error
            );
        }
    }

    /// `retry_base * 2^max(0, failures - threshold)`
    fn backoff_for(&self, failure_count: u32) -> Duration {
        let exponent = failure_count
            .saturating_sub(self.settings.failure_threshold)
            .min(16);
        Duration::from_millis(
            self.settings
                .retry_timeout_base_ms
                .saturating_mul(1u64 << exponent),
        )
    }

    fn publish(&self, from: CircuitState, to: CircuitState) {
        if let Some(bus) = &self.events {
            bus.publish(ReplicationEvent::BreakerStateChanged {
                domain: self.domain.clone(),
                from: from.into(),
                to: to.into(),
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

/// Releases the half-open probe slot if the call is dropped mid-flight
struct ProbeGuard<'a>(&'a CircuitBreaker);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.lock().probe_in_flight = false;
    }
}
