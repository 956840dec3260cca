//! Reconnect backoff configuration and delay calculation.
//!
//! Pure, sync-only building blocks. The stateful supervisor that drives
//! reconnection lives in `relay-connector`.
//!
//! - [`BackoffPolicy`]: base delay, cap, and attempt limit
//! - [`reconnect_delay`]: `base * 2^(attempt - 1)`, capped

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Maximum number of reconnect attempts (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first attempt in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in ms (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt under this policy.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(reconnect_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }

    /// Whether another attempt is allowed after `attempts_made`.
    #[must_use]
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Delay in milliseconds before the `attempt`-th reconnect (1-based).
///
/// Formula: `min(max_delay, base_delay * 2^(attempt - 1))`. Attempt `0` is
/// treated as attempt `1`. Saturates instead of overflowing.
#[must_use]
pub fn reconnect_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 60_000);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: BackoffPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, BackoffPolicy::default());
    }

    #[test]
    fn policy_serde_camel_case() {
        let policy: BackoffPolicy =
            serde_json::from_str(r#"{"maxAttempts":3,"baseDelayMs":50}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 50);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        assert_eq!(reconnect_delay(1, 1000, 60_000), 1000);
        assert_eq!(reconnect_delay(2, 1000, 60_000), 2000);
        assert_eq!(reconnect_delay(3, 1000, 60_000), 4000);
        assert_eq!(reconnect_delay(4, 1000, 60_000), 8000);
        assert_eq!(reconnect_delay(5, 1000, 60_000), 16_000);
    }

    #[test]
    fn attempt_zero_uses_base() {
        assert_eq!(reconnect_delay(0, 250, 60_000), 250);
    }

    #[test]
    fn delay_caps_at_max() {
        assert_eq!(reconnect_delay(10, 1000, 60_000), 60_000);
    }

    #[test]
    fn high_attempt_does_not_overflow() {
        assert_eq!(reconnect_delay(200, 1000, 60_000), 60_000);
        assert_eq!(reconnect_delay(64, u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn delays_strictly_double_within_cap() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 60_000,
        };
        let delays: Vec<Duration> = (1..=policy.max_attempts)
            .map(|n| policy.delay_for(n))
            .collect();
        for pair in delays.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
    }

    #[test]
    fn allows_until_max() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::default()
        };
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
