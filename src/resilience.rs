//! Timeouts, bounded retry and circuit breaking for external calls.
//!
//! Every call to the oracle, the store, the SMS gateway or the actuator goes
//! through a [`CallGuard`], so one slow dependency cannot stall a consumer
//! indefinitely.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ExternalCallError;

// ── Retry ───────────────────────────────────────────────────────────

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Upper bound of the delay before attempt `attempt + 1`.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before attempt `attempt + 1`: half the ceiling plus random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

// ── Circuit breaker ─────────────────────────────────────────────────

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Rejecting calls until the cooldown elapses.
    Open,
    /// Cooldown elapsed; one probe call is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker still holds consistent counters
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && inner.opened_at.is_some_and(|t| t.elapsed() >= self.cooldown)
        {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }

    /// Whether a call may proceed now.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
        }
    }
}

// ── Call guard ──────────────────────────────────────────────────────

/// Timeout, retry and breaker settings for one external dependency.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl CallPolicy {
    /// Single attempt with a timeout and a breaker that effectively never opens.
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryPolicy::none(),
            failure_threshold: u32::MAX,
            cooldown: Duration::ZERO,
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Wraps calls to one external dependency.
pub struct CallGuard {
    name: String,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl CallGuard {
    pub fn new(name: impl Into<String>, policy: &CallPolicy) -> Self {
        Self {
            name: name.into(),
            timeout: policy.timeout,
            retry: policy.retry.clone(),
            breaker: CircuitBreaker::new(policy.failure_threshold, policy.cooldown),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `op` under the timeout, retrying retryable failures with backoff.
    ///
    /// Only retryable failures count against the breaker; a non-retryable one
    /// means the dependency answered. If the breaker opens between retries the
    /// last real failure is returned rather than [`ExternalCallError::CircuitOpen`].
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, ExternalCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalCallError>>,
    {
        let mut attempt = 1;
        let mut last_error: Option<ExternalCallError> = None;
        loop {
            if !self.breaker.try_acquire() {
                return Err(last_error.unwrap_or_else(|| ExternalCallError::CircuitOpen {
                    call: self.name.clone(),
                }));
            }

            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ExternalCallError::Timeout {
                    call: self.name.clone(),
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        debug!(call = %self.name, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    self.breaker.record_success();
                    return Err(e);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    if attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(call = %self.name, attempt, error = %e, ?delay, "Call failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                    attempt += 1;
                }
            }
        }
    }
}
