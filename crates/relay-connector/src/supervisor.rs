//! Reconnection supervisor.
//!
//! Pure state: decides whether and when to retry, the coordinator owns the
//! timers. Delay before attempt `N` is `base * 2^(N-1)`, capped. The attempt
//! counter resets only when a link that just dropped had stayed up for at
//! least the stability window.

use std::time::Duration;

use relay_core::retry::BackoffPolicy;
use serde::Serialize;
use tokio::time::Instant;

/// Connection lifecycle as seen by callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and no pending attempt.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is ready.
    Connected,
    /// Waiting for the next reconnect attempt.
    Reconnecting,
    /// Attempts exhausted; terminal until the next manual connect.
    GivingUp,
}

impl ConnectionState {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::GivingUp => "giving_up",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Schedule attempt `attempt` after `delay`.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before dialing.
        delay: Duration,
    },
    /// Stop; `attempts` reconnects were made.
    GiveUp {
        /// Attempts made since the last reset.
        attempts: u32,
    },
}

/// Backoff bookkeeping for one connector.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: BackoffPolicy,
    auto_reconnect: bool,
    stability: Duration,
    attempts: u32,
    delays_ms: Vec<u64>,
    connected_at: Option<Instant>,
}

impl ReconnectSupervisor {
    /// Create a supervisor.
    pub fn new(policy: BackoffPolicy, auto_reconnect: bool, stability: Duration) -> Self {
        Self {
            policy,
            auto_reconnect,
            stability,
            attempts: 0,
            delays_ms: Vec::new(),
            connected_at: None,
        }
    }

    /// A link became ready at `now`.
    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
    }

    /// The link dropped without a manual disconnect.
    pub fn on_unexpected_close(&mut self, now: Instant) -> Decision {
        if let Some(since) = self.connected_at.take() {
            if now.saturating_duration_since(since) >= self.stability {
                self.attempts = 0;
                self.delays_ms.clear();
            }
        }
        self.next_attempt()
    }

    /// A reconnect attempt failed.
    pub fn on_attempt_failed(&mut self) -> Decision {
        self.next_attempt()
    }

    /// Forget all history (manual connect or disconnect).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delays_ms.clear();
        self.connected_at = None;
    }

    fn next_attempt(&mut self) -> Decision {
        if !self.auto_reconnect || !self.policy.allows(self.attempts) {
            return Decision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.delays_ms
            .push(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        Decision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt limit.
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Delays scheduled since the last reset, in milliseconds.
    pub fn delays_ms(&self) -> &[u64] {
        &self.delays_ms
    }

    /// Whether unexpected closures are retried at all.
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(max: u32, base_ms: u64) -> ReconnectSupervisor {
        ReconnectSupervisor::new(
            BackoffPolicy {
                max_attempts: max,
                base_delay_ms: base_ms,
                max_delay_ms: 60_000,
            },
            true,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn doubling_then_give_up() {
        let mut s = supervisor(3, 20);
        let now = Instant::now();
        s.on_connected(now);
        assert_eq!(
            s.on_unexpected_close(now),
            Decision::Retry { attempt: 1, delay: Duration::from_millis(20) }
        );
        assert_eq!(
            s.on_attempt_failed(),
            Decision::Retry { attempt: 2, delay: Duration::from_millis(40) }
        );
        assert_eq!(
            s.on_attempt_failed(),
            Decision::Retry { attempt: 3, delay: Duration::from_millis(80) }
        );
        assert_eq!(s.on_attempt_failed(), Decision::GiveUp { attempts: 3 });
        assert_eq!(s.delays_ms(), [20, 40, 80]);
    }

    #[test]
    fn disabled_gives_up_immediately() {
        let mut s = ReconnectSupervisor::new(BackoffPolicy::default(), false, Duration::ZERO);
        assert_eq!(s.on_unexpected_close(Instant::now()), Decision::GiveUp { attempts: 0 });
        assert!(s.delays_ms().is_empty());
    }

    #[test]
    fn zero_max_gives_up_immediately() {
        let mut s = supervisor(0, 10);
        assert_eq!(s.on_unexpected_close(Instant::now()), Decision::GiveUp { attempts: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_link_keeps_counter() {
        let mut s = supervisor(5, 10);
        s.on_connected(Instant::now());
        let _ = s.on_unexpected_close(Instant::now());
        // Reconnected, then dropped again after 1s
        s.on_connected(Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            s.on_unexpected_close(Instant::now()),
            Decision::Retry { attempt: 2, delay: Duration::from_millis(20) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stable_link_resets_counter() {
        let mut s = supervisor(5, 10);
        s.on_connected(Instant::now());
        let _ = s.on_unexpected_close(Instant::now());
        let _ = s.on_attempt_failed();
        s.on_connected(Instant::now());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            s.on_unexpected_close(Instant::now()),
            Decision::Retry { attempt: 1, delay: Duration::from_millis(10) }
        );
        assert_eq!(s.delays_ms(), [10]);
    }

    #[test]
    fn reset_clears_history() {
        let mut s = supervisor(2, 10);
        let _ = s.on_unexpected_close(Instant::now());
        let _ = s.on_attempt_failed();
        s.reset();
        assert_eq!(s.attempts(), 0);
        assert!(s.delays_ms().is_empty());
        assert!(matches!(s.on_attempt_failed(), Decision::Retry { attempt: 1, .. }));
    }

    #[test]
    fn delays_are_capped() {
        let mut s = ReconnectSupervisor::new(
            BackoffPolicy {
                max_attempts: 4,
                base_delay_ms: 100,
                max_delay_ms: 250,
            },
            true,
            Duration::ZERO,
        );
        let _ = s.on_attempt_failed();
        let _ = s.on_attempt_failed();
        let _ = s.on_attempt_failed();
        assert_eq!(s.delays_ms(), [100, 200, 250]);
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::GivingUp).unwrap(),
            "\"giving_up\""
        );
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
