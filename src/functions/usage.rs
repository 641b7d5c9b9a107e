//! # Usage Limits
//!
//! Per-user request rate limiting and daily message quotas for the
//! assistant, and the premium directory both functions share.
//!
//! Days are UTC calendar days. All methods take the current time so the
//! limits can be exercised without a clock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use super::errors::{AssistantError, AssistantResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sliding-window request limiter
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<HashMap<Uuid, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Requests per minute
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::minutes(1))
    }

    /// Record a request, or refuse it when the window is full
    pub fn try_acquire(&self, user: Uuid, now: DateTime<Utc>) -> AssistantResult<()> {
        let mut requests = lock(&self.requests);
        let history = requests.entry(user).or_default();

        while history
            .front()
            .is_some_and(|&at| now - at >= self.window)
        {
            history.pop_front();
        }

        if history.len() as u32 >= self.max_requests {
            let retry_after = history
                .front()
                .map(|&oldest| (oldest + self.window - now).num_seconds().max(1))
                .unwrap_or(1);
            return Err(AssistantError::RateLimited {
                retry_after_secs: retry_after as u64,
            });
        }

        history.push_back(now);
        Ok(())
    }
}

/// Messages charged per user per UTC day
#[derive(Debug, Default)]
pub struct UsageTracker {
    counts: Mutex<HashMap<Uuid, (NaiveDate, u32)>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages charged today
    pub fn count(&self, user: Uuid, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        match lock(&self.counts).get(&user) {
            Some((day, count)) if *day == today => *count,
            _ => 0,
        }
    }

    /// Charge one message; returns the new daily count
    pub fn charge(&self, user: Uuid, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        let mut counts = lock(&self.counts);
        let entry = counts.entry(user).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        entry.1 += 1;
        entry.1
    }
}

/// Premium access record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumGrant {
    pub granted_at: DateTime<Utc>,
    /// Payment that granted access, as `gateway:external_id`
    pub source: String,
}

/// Users with premium access
#[derive(Debug, Default)]
pub struct PremiumDirectory {
    grants: RwLock<HashMap<Uuid, PremiumGrant>>,
}

impl PremiumDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_premium(&self, user: Uuid) -> bool {
        self.grants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&user)
    }

    pub fn grant_of(&self, user: Uuid) -> Option<PremiumGrant> {
        self.grants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&user)
            .cloned()
    }

    /// Grant premium; returns false if the user already had it
    pub fn grant(&self, user: Uuid, source: impl Into<String>, at: DateTime<Utc>) -> bool {
        let mut grants = self
            .grants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if grants.contains_key(&user) {
            return false;
        }
        grants.insert(
            user,
            PremiumGrant {
                granted_at: at,
                source: source.into(),
            },
        );
        true
    }

    /// Revoke premium; returns false if the user did not have it
    pub fn revoke(&self, user: Uuid) -> bool {
        self.grants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&user)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::per_minute(2);
        let user = Uuid::new_v4();

        assert!(limiter.try_acquire(user, at(10, 0, 0)).is_ok());
        assert!(limiter.try_acquire(user, at(10, 0, 10)).is_ok());

        match limiter.try_acquire(user, at(10, 0, 20)) {
            Err(AssistantError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 40)
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        // Oldest request leaves the window
        assert!(limiter.try_acquire(user, at(10, 1, 0)).is_ok());
    }

    #[test]
    fn test_rate_limiter_is_per_user() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.try_acquire(Uuid::new_v4(), at(10, 0, 0)).is_ok());
        assert!(limiter.try_acquire(Uuid::new_v4(), at(10, 0, 0)).is_ok());
    }

    #[test]
    fn test_usage_resets_each_day() {
        let usage = UsageTracker::new();
        let user = Uuid::new_v4();

        assert_eq!(usage.charge(user, at(23, 0, 0)), 1);
        assert_eq!(usage.charge(user, at(23, 59, 0)), 2);
        assert_eq!(usage.count(user, at(23, 59, 59)), 2);

        let tomorrow = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
        assert_eq!(usage.count(user, tomorrow), 0);
        assert_eq!(usage.charge(user, tomorrow), 1);
    }

    #[test]
    fn test_premium_grant_and_revoke() {
        let directory = PremiumDirectory::new();
        let user = Uuid::new_v4();

        assert!(!directory.is_premium(user));
        assert!(directory.grant(user, "stripe:pi_1", at(9, 0, 0)));
        assert!(!directory.grant(user, "stripe:pi_2", at(9, 5, 0)));
        assert_eq!(directory.grant_of(user).unwrap().source, "stripe:pi_1");

        assert!(directory.revoke(user));
        assert!(!directory.revoke(user));
        assert!(!directory.is_premium(user));
    }
}
