//! # Circuit Breaker
//!
//! Stops reconnect storms when a channel keeps failing.
//!
//! After `max_retries` consecutive failures the circuit opens and no new
//! channel may be created until `retry_delay * 2^max_retries` has elapsed
//! since the last failure. A successful subscribe closes it immediately.
//!
//! Breakers live in a [`CircuitRegistry`] keyed by channel purpose, so the
//! failure count survives an activation being torn down and recreated by
//! the same caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::time::Instant;

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub max_retries: u32,
    /// Base delay for reconnect backoff
    pub retry_delay: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(8000),
        }
    }
}

impl CircuitConfig {
    /// Cooldown while open: `retry_delay * 2^max_retries`
    pub fn cooldown(&self) -> Duration {
        scaled(self.retry_delay, self.max_retries)
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        scaled(self.retry_delay, attempt.saturating_sub(1))
    }
}

fn scaled(base: Duration, exponent: u32) -> Duration {
    2u32.checked_pow(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Open/closed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
        }
    }
}

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still below threshold; reconnect after `backoff`
    Retry { attempt: u32, backoff: Duration },
    /// Threshold reached; circuit is now open
    Opened { retry_after: Duration },
}

/// Whether a new channel may be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    failures: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            failures: 0,
            last_failure: None,
            state: CircuitState::Closed,
        }
    }

    pub fn config(&self) -> CircuitConfig {
        self.config
    }

    /// Replace the thresholds, keeping counters
    pub fn reconfigure(&mut self, config: CircuitConfig) {
        self.config = config;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures since the last success or reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a channel error or timeout
    pub fn record_failure(&mut self, now: Instant) -> FailureOutcome {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        if self.failures >= self.config.max_retries {
            self.state = CircuitState::Open;
            FailureOutcome::Opened {
                retry_after: self.config.cooldown(),
            }
        } else {
            FailureOutcome::Retry {
                attempt: self.failures,
                backoff: self.config.backoff(self.failures),
            }
        }
    }

    /// Record a successful subscribe
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.state = CircuitState::Closed;
    }

    /// Decide whether a channel may be created at `now`
    ///
    /// An open circuit whose cooldown has elapsed closes and resets its
    /// failure count.
    pub fn admit(&mut self, now: Instant) -> Admission {
        if self.state == CircuitState::Closed {
            return Admission::Allowed;
        }

        let cooldown = self.config.cooldown();
        let elapsed = self
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(cooldown);

        if elapsed >= cooldown {
            self.failures = 0;
            self.state = CircuitState::Closed;
            Admission::Allowed
        } else {
            Admission::Rejected {
                retry_after: cooldown - elapsed,
            }
        }
    }
}

/// Shared handle to one breaker
pub type SharedBreaker = Arc<Mutex<CircuitBreaker>>;

/// Lock a breaker, recovering the data if a holder panicked
pub(crate) fn lock(breaker: &SharedBreaker) -> MutexGuard<'_, CircuitBreaker> {
    breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Breakers keyed by logical channel purpose
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    breakers: Mutex<HashMap<String, SharedBreaker>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by managers that are not given one
    pub fn global() -> Arc<CircuitRegistry> {
        static GLOBAL: OnceLock<Arc<CircuitRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CircuitRegistry::new())).clone()
    }

    /// Breaker for `purpose`, created on first use
    ///
    /// An existing breaker keeps its counters but adopts `config`.
    pub fn breaker(&self, purpose: &str, config: CircuitConfig) -> SharedBreaker {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let breaker = breakers
            .entry(purpose.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(config))))
            .clone();
        drop(breakers);

        lock(&breaker).reconfigure(config);
        breaker
    }

    /// Snapshot of a breaker's state, if one exists
    pub fn inspect(&self, purpose: &str) -> Option<(CircuitState, u32)> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers.get(purpose).map(|b| {
            let b = lock(b);
            (b.state(), b.failures())
        })
    }

    /// Forget the breaker for `purpose`
    pub fn reset(&self, purpose: &str) {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(purpose);
    }

    /// Forget every breaker
    pub fn reset_all(&self) {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn config() -> CircuitConfig {
        CircuitConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(8000),
        }
    }

    #[test]
    fn test_cooldown_and_backoff() {
        let config = config();
        assert_eq!(config.cooldown(), secs(64));
        assert_eq!(config.backoff(1), secs(8));
        assert_eq!(config.backoff(2), secs(16));
    }

    #[test]
    fn test_cooldown_saturates() {
        let config = CircuitConfig {
            max_retries: 64,
            retry_delay: secs(1),
        };
        assert_eq!(config.cooldown(), Duration::MAX);
    }

    #[test]
    fn test_opens_after_max_retries() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new(config());

        assert_eq!(
            breaker.record_failure(t0),
            FailureOutcome::Retry { attempt: 1, backoff: secs(8) }
        );
        assert_eq!(
            breaker.record_failure(t0 + secs(1)),
            FailureOutcome::Retry { attempt: 2, backoff: secs(16) }
        );
        assert_eq!(
            breaker.record_failure(t0 + secs(2)),
            FailureOutcome::Opened { retry_after: secs(64) }
        );
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_cooldown_scenario() {
        // Errors at t=0,1,2s; retry_delay 8000ms; max_retries 3
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new(config());
        for s in 0..3 {
            breaker.record_failure(t0 + secs(s));
        }

        assert_eq!(
            breaker.admit(t0 + secs(3)),
            Admission::Rejected { retry_after: secs(63) }
        );
        assert_eq!(
            breaker.admit(t0 + secs(10)),
            Admission::Rejected { retry_after: secs(56) }
        );
        assert_eq!(breaker.failures(), 3);

        // Cooldown counts from the last failure (t=2s)
        assert_eq!(breaker.admit(t0 + secs(66)), Admission::Allowed);
        assert_eq!(breaker.failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_below_threshold() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new(config());
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert_eq!(breaker.failures(), 2);

        breaker.record_success();
        assert_eq!(breaker.failures(), 0);

        // Needs a full run of failures again to open
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breaker_per_purpose() {
        let registry = CircuitRegistry::new();
        let a = registry.breaker("student-chat", config());
        lock(&a).record_failure(Instant::now());

        let again = registry.breaker("student-chat", config());
        assert_eq!(lock(&again).failures(), 1);
        assert_eq!(registry.inspect("student-chat"), Some((CircuitState::Closed, 1)));

        let other = registry.breaker("workouts", config());
        assert_eq!(lock(&other).failures(), 0);
    }

    #[test]
    fn test_registry_reset() {
        let registry = CircuitRegistry::new();
        let breaker = registry.breaker("feed", config());
        lock(&breaker).record_failure(Instant::now());

        registry.reset("feed");
        assert_eq!(registry.inspect("feed"), None);
        assert_eq!(lock(&registry.breaker("feed", config())).failures(), 0);

        registry.breaker("a", config());
        registry.breaker("b", config());
        registry.reset_all();
        assert_eq!(registry.inspect("a"), None);
    }

    #[test]
    fn test_registry_reset_after_holder_panicked() {
        let registry = Arc::new(CircuitRegistry::new());
        registry.breaker("feed", config());
        registry.breaker("workouts", config());

        let holder = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _breakers = holder.breakers.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(registry.breakers.is_poisoned());

        registry.reset("feed");
        assert_eq!(registry.inspect("feed"), None);
        assert!(registry.inspect("workouts").is_some());

        registry.reset_all();
        assert_eq!(registry.inspect("workouts"), None);
    }
}
