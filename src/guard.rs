//! Brute-force guard for authentication attempts.
//!
//! Failed attempts per identity key (source address or claimed username)
//! are counted in a sliding window; exceeding the threshold locks the key
//! for an escalating duration. A locked key is denied before credentials
//! are ever checked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Lock-duration curve applied per consecutive violation. The growth
/// function is policy, not protocol, so both shapes are available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackoffPolicy {
    /// `base * 2^(violations - 1)`, capped.
    Exponential { base: Duration, cap: Duration },
    /// `base + step * (violations - 1)`, capped.
    Linear {
        base: Duration,
        step: Duration,
        cap: Duration,
    },
}

impl BackoffPolicy {
    pub fn lock_duration(&self, violations: u32) -> Duration {
        let violations = violations.max(1);
        match *self {
            BackoffPolicy::Exponential { base, cap } => {
                let shift = (violations - 1).min(16);
                base.saturating_mul(1u32 << shift).min(cap)
            }
            BackoffPolicy::Linear { base, step, cap } => base
                .saturating_add(step.saturating_mul(violations - 1))
                .min(cap),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        // First lockout matches the legacy behavior of blocking for twice
        // the attempt window; repeat offenders double from there.
        BackoffPolicy::Exponential {
            base: Duration::from_secs(30 * 60),
            cap: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts tolerated inside the window before a lockout.
    pub max_attempts: u32,
    /// Sliding window length.
    pub window: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Result of recording one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl AttemptOutcome {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn locked(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug)]
struct AttemptRecord {
    failures: Vec<Instant>,
    lock_until: Option<Instant>,
    violations: u32,
    last_seen: Instant,
}

impl AttemptRecord {
    fn new(now: Instant) -> Self {
        Self {
            failures: Vec::new(),
            lock_until: None,
            violations: 0,
            last_seen: now,
        }
    }

    fn locked_remaining(&self, now: Instant) -> Option<Duration> {
        self.lock_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

// Purge cadence: sweep stale records once per this many attempts.
const PURGE_EVERY: u64 = 256;

pub struct BruteForceGuard {
    config: RateLimitConfig,
    records: DashMap<String, AttemptRecord>,
    attempts_seen: AtomicU64,
}

impl BruteForceGuard {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            attempts_seen: AtomicU64::new(0),
        }
    }

    /// Remaining lockout for a key, if any. This is the pre-credential gate:
    /// a locked key must not reach the identity resolver.
    pub fn lock_remaining(&self, identity_key: &str) -> Option<Duration> {
        self.records
            .get(identity_key)
            .and_then(|record| record.locked_remaining(Instant::now()))
    }

    /// Record one authentication attempt for a key and decide whether the
    /// attempt may proceed.
    pub fn record_attempt(&self, identity_key: &str, success: bool) -> AttemptOutcome {
        if self.attempts_seen.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_stale();
        }

        let now = Instant::now();
        let window = self.config.window;
        let mut record = self
            .records
            .entry(identity_key.to_string())
            .or_insert_with(|| AttemptRecord::new(now));

        record.failures.retain(|at| now.duration_since(*at) < window);

        // A full quiet window with no lock resets escalation; relapsing
        // offenders inside the window keep their violation history.
        let lock_active = record.locked_remaining(now).is_some();
        if !lock_active
            && record.failures.is_empty()
            && now.duration_since(record.last_seen) >= window
        {
            record.violations = 0;
        }
        record.last_seen = now;

        if let Some(remaining) = record.locked_remaining(now) {
            return AttemptOutcome::locked(remaining);
        }
        record.lock_until = None;

        if success {
            record.failures.clear();
            return AttemptOutcome::allowed();
        }

        record.failures.push(now);

        if record.failures.len() as u32 > self.config.max_attempts {
            record.violations += 1;
            let lock = self.config.backoff.lock_duration(record.violations);
            record.lock_until = Some(now + lock);
            tracing::warn!(
                target: "audit",
                identity_key = identity_key,
                violations = record.violations,
                lock_secs = lock.as_secs(),
                "authentication lockout"
            );
            return AttemptOutcome::locked(lock);
        }

        AttemptOutcome::allowed()
    }

    /// Drop records with no active lock and no activity for a full window.
    pub fn purge_stale(&self) {
        let now = Instant::now();
        let window = self.config.window;
        self.records.retain(|_, record| {
            record.locked_remaining(now).is_some()
                || now.duration_since(record.last_seen) < window
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            max_attempts: 5,
            window: Duration::from_millis(200),
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(50),
                cap: Duration::from_secs(10),
            },
        }
    }

    #[test]
    fn sixth_failure_inside_window_locks() {
        let guard = BruteForceGuard::new(fast_config());
        for _ in 0..5 {
            assert!(guard.record_attempt("10.0.0.1", false).allowed);
        }
        let outcome = guard.record_attempt("10.0.0.1", false);
        assert!(!outcome.allowed);
        assert!(outcome.retry_after.is_some());
        assert!(guard.lock_remaining("10.0.0.1").is_some());
    }

    #[test]
    fn attempt_after_window_expiry_is_allowed() {
        let guard = BruteForceGuard::new(fast_config());
        for _ in 0..5 {
            guard.record_attempt("10.0.0.2", false);
        }
        sleep(Duration::from_millis(250));
        assert!(guard.record_attempt("10.0.0.2", false).allowed);
    }

    #[test]
    fn second_violation_locks_longer_than_first() {
        let guard = BruteForceGuard::new(fast_config());

        let mut first = None;
        for _ in 0..6 {
            first = guard.record_attempt("10.0.0.3", false).retry_after;
        }
        let first = first.expect("first violation should lock");

        sleep(Duration::from_millis(60)); // lock expired, window still live
        let mut second = None;
        for _ in 0..6 {
            second = guard.record_attempt("10.0.0.3", false).retry_after;
        }
        let second = second.expect("second violation should lock");

        assert!(second > first, "expected {second:?} > {first:?}");
    }

    #[test]
    fn success_clears_window_but_keeps_violation_history() {
        let guard = BruteForceGuard::new(fast_config());

        for _ in 0..6 {
            guard.record_attempt("carol", false);
        }
        sleep(Duration::from_millis(60)); // let the first lock lapse

        assert!(guard.record_attempt("carol", true).allowed);

        // Fresh failures start from an empty window, but the next lock
        // escalates because the violation history survived the success.
        let mut locked = None;
        for _ in 0..6 {
            locked = guard.record_attempt("carol", false).retry_after;
        }
        assert!(locked.expect("relapse should lock") > Duration::from_millis(50));
    }

    #[test]
    fn quiet_window_resets_escalation() {
        let guard = BruteForceGuard::new(fast_config());

        for _ in 0..6 {
            guard.record_attempt("dave", false);
        }
        // Wait out both the lock and a full quiet window.
        sleep(Duration::from_millis(300));

        let mut locked = None;
        for _ in 0..6 {
            locked = guard.record_attempt("dave", false).retry_after;
        }
        assert_eq!(locked, Some(Duration::from_millis(50)));
    }

    #[test]
    fn locked_key_is_denied_without_counting() {
        let guard = BruteForceGuard::new(fast_config());
        for _ in 0..6 {
            guard.record_attempt("eve", false);
        }
        let outcome = guard.record_attempt("eve", true);
        assert!(!outcome.allowed, "lock must gate even correct credentials");
    }

    #[test]
    fn stale_records_are_purged() {
        let guard = BruteForceGuard::new(fast_config());
        guard.record_attempt("fred", false);
        assert_eq!(guard.tracked_keys(), 1);

        sleep(Duration::from_millis(250));
        guard.purge_stale();
        assert_eq!(guard.tracked_keys(), 0);
    }

    #[test]
    fn linear_backoff_grows_by_step() {
        let policy = BackoffPolicy::Linear {
            base: Duration::from_secs(60),
            step: Duration::from_secs(30),
            cap: Duration::from_secs(120),
        };
        assert_eq!(policy.lock_duration(1), Duration::from_secs(60));
        assert_eq!(policy.lock_duration(2), Duration::from_secs(90));
        assert_eq!(policy.lock_duration(5), Duration::from_secs(120));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.lock_duration(1), Duration::from_secs(1800));
        assert_eq!(policy.lock_duration(2), Duration::from_secs(3600));
        assert_eq!(policy.lock_duration(30), Duration::from_secs(24 * 60 * 60));
    }
}
