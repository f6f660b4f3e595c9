//! Host time source.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of host wall-clock time as fractional Unix seconds.
pub trait HostClock {
    /// Current host time in seconds since the Unix epoch.
    fn now(&self) -> f64;
}

/// [`HostClock`] backed by the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl HostClock for SystemClock {
    fn now(&self) -> f64 {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl<C: HostClock + ?Sized> HostClock for &C {
    fn now(&self) -> f64 {
        (**self).now()
    }
}
