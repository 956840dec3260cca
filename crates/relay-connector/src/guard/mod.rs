//! Resource guard: admission control for frames and connections.
//!
//! - [`RateWindow`]: sliding-window send limiter (default 100 per 60s)
//! - [`ResourceGuard`]: size cap, content screening, and rate check for
//!   one connector, all synchronous and side-effect free on rejection
//! - [`ConnectionBudget`]: counting permit pool capping physical
//!   connections, shareable between connectors

pub mod screening;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{ConnectorError, Result};
use relay_settings::GuardSettings;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::warn;

pub use screening::{Screening, Verdict, screen_content};

/// Limits applied by a [`ResourceGuard`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardLimits {
    /// Largest serialized frame, in bytes.
    pub max_message_bytes: usize,
    /// Sends admitted per window.
    pub rate_limit_max: usize,
    /// Trailing window length.
    pub rate_limit_window: Duration,
    /// Reject outbound and drop inbound payloads screened as malicious.
    pub block_malicious: bool,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self::from(&GuardSettings::default())
    }
}

impl From<&GuardSettings> for GuardLimits {
    fn from(settings: &GuardSettings) -> Self {
        Self {
            max_message_bytes: settings.max_message_bytes,
            rate_limit_max: settings.rate_limit_max,
            rate_limit_window: Duration::from_millis(settings.rate_limit_window_ms),
            block_malicious: settings.block_malicious,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate window
// ─────────────────────────────────────────────────────────────────────────────

/// Admission timestamps within the trailing window, oldest first.
#[derive(Debug)]
pub struct RateWindow {
    sends: VecDeque<Instant>,
    max: usize,
    window: Duration,
}

impl RateWindow {
    /// Create an empty window.
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            sends: VecDeque::with_capacity(max.min(1024)),
            max,
            window,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.sends.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            let _ = self.sends.pop_front();
        }
    }

    /// Prune, then admit and record `now` if the window has room.
    pub fn try_admit(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.sends.len() >= self.max {
            return false;
        }
        self.sends.push_back(now);
        true
    }

    /// Sends currently counted against the window.
    pub fn occupancy(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.sends.len()
    }

    /// Configured ceiling.
    pub fn limit(&self) -> usize {
        self.max
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource guard
// ─────────────────────────────────────────────────────────────────────────────

/// Per-connector admission control.
#[derive(Debug)]
pub struct ResourceGuard {
    limits: GuardLimits,
    window: RateWindow,
}

impl ResourceGuard {
    /// Create a guard with the given limits.
    pub fn new(limits: GuardLimits) -> Self {
        let window = RateWindow::new(limits.rate_limit_max, limits.rate_limit_window);
        Self { limits, window }
    }

    /// Configured limits.
    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    /// Admit one send against the sliding window.
    pub fn check_rate(&mut self) -> Result<()> {
        if self.window.try_admit(Instant::now()) {
            Ok(())
        } else {
            Err(ConnectorError::RateLimited {
                limit: self.window.limit(),
                window_ms: u64::try_from(self.window.window().as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    /// Reject frames whose serialized size exceeds the ceiling.
    pub fn check_size(&self, frame: &str) -> Result<()> {
        let size = frame.len();
        if size > self.limits.max_message_bytes {
            return Err(ConnectorError::PayloadTooLarge {
                size,
                max: self.limits.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Screen a serialized payload.
    pub fn screen(&self, frame: &str) -> Screening {
        screen_content(frame)
    }

    /// Full outbound admission: size, then screening, then rate.
    ///
    /// Rate goes last because admitting records a timestamp; a frame
    /// rejected by an earlier check leaves the window untouched.
    pub fn admit_outbound(&mut self, frame: &str) -> Result<Screening> {
        self.check_size(frame)?;
        let screening = self.screen(frame);
        if screening.is_malicious() && self.limits.block_malicious {
            return Err(ConnectorError::ContentRejected {
                rules: screening.rules.iter().map(|r| (*r).to_string()).collect(),
            });
        }
        if !screening.is_clean() {
            warn!(rules = ?screening.rules, verdict = ?screening.verdict, "outbound payload flagged by screening");
        }
        self.check_rate()?;
        Ok(screening)
    }

    /// Inbound check: size, then screening. Malicious frames are rejected
    /// when blocking is enabled; the rate window is not consulted.
    pub fn admit_inbound(&self, frame: &str) -> Result<Screening> {
        self.check_size(frame)?;
        let screening = self.screen(frame);
        if screening.is_malicious() && self.limits.block_malicious {
            return Err(ConnectorError::ContentRejected {
                rules: screening.rules.iter().map(|r| (*r).to_string()).collect(),
            });
        }
        Ok(screening)
    }

    /// Sends counted in the current window.
    pub fn rate_occupancy(&mut self) -> usize {
        self.window.occupancy(Instant::now())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection budget
// ─────────────────────────────────────────────────────────────────────────────

/// Counting permit pool for physical connections.
///
/// Clones share the same pool, so handing one budget to several connectors
/// caps their combined connection count.
#[derive(Clone, Debug)]
pub struct ConnectionBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One physical connection's slot in a [`ConnectionBudget`]. Released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionBudget {
    /// Create a budget allowing `capacity` concurrent connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot for a connection to `url`, failing when the ceiling is reached.
    pub fn try_acquire(&self, url: &str) -> Result<ConnectionPermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map(|permit| ConnectionPermit { _permit: permit })
            .map_err(|_| {
                ConnectorError::connection(
                    url,
                    format!("connection ceiling of {} reached", self.capacity),
                )
            })
    }

    /// Maximum concurrent connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }
}

impl Default for ConnectionBudget {
    fn default() -> Self {
        Self::new(GuardSettings::default().max_connections)
    }
}
