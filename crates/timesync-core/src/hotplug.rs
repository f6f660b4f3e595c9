//! Device presence tracking.
//!
//! The watcher performs no I/O. The owning [`Device`](crate::Device) feeds
//! it the outcome of every register transaction; a run of consecutive
//! communication failures marks the device absent, and the next success
//! marks it present again.

use tracing::{info, warn};

/// Default number of consecutive failures before a device is considered absent.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Observed device presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    /// No transaction has completed yet.
    #[default]
    Unknown,
    /// The device answered the last transaction.
    Present,
    /// The device failed the configured number of transactions in a row.
    Absent,
}

/// Presence tracker driven by transaction outcomes.
#[derive(Debug, Clone)]
pub struct HotplugWatcher {
    presence: Presence,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl Default for HotplugWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HotplugWatcher {
    /// Create a watcher with the default failure threshold.
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    /// Create a watcher that reports absence after `threshold` consecutive
    /// failures (at least one).
    pub fn with_failure_threshold(threshold: u32) -> Self {
        Self {
            presence: Presence::Unknown,
            consecutive_failures: 0,
            failure_threshold: threshold.max(1),
        }
    }

    /// Current presence.
    pub fn presence(&self) -> Presence {
        self.presence
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful transaction. Returns the new presence on a transition.
    pub fn record_success(&mut self) -> Option<Presence> {
        self.consecutive_failures = 0;
        if self.presence == Presence::Present {
            return None;
        }
        info!(previous = ?self.presence, "Device present");
        self.presence = Presence::Present;
        Some(Presence::Present)
    }

    /// Record a failed transaction. Returns the new presence on a transition.
    pub fn record_failure(&mut self) -> Option<Presence> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.presence == Presence::Absent || self.consecutive_failures < self.failure_threshold {
            return None;
        }
        warn!(
            failures = self.consecutive_failures,
            "Device absent after consecutive communication failures"
        );
        self.presence = Presence::Absent;
        Some(Presence::Absent)
    }
}
