// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time sources for the conductor.
//!
//! The conductor reads two clocks: a monotonic nanosecond clock for deadlines
//! and service intervals, and a wall-clock millisecond source compared against
//! the driver heartbeat (which the driver writes as epoch milliseconds).
//!
//! Both are supplied through [`Clock`] at construction so tests can drive time
//! explicitly with [`ManualClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and epoch time.
pub trait Clock: Send + Sync {
    /// Monotonic time in nanoseconds. Only differences are meaningful.
    fn nano_time(&self) -> i64;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64;
}

/// Clock backed by the operating system.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn nano_time(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    #[inline]
    fn epoch_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Epoch milliseconds track nanoseconds (`millis = nanos / 1_000_000`) so the
/// driver heartbeat and command deadlines move together.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at the given monotonic time.
    #[must_use]
    pub fn starting_at(nanos: i64) -> Self {
        Self {
            nanos: AtomicI64::new(nanos),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::AcqRel);
    }

    /// Set the absolute monotonic time.
    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn nano_time(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }

    #[inline]
    fn epoch_millis(&self) -> i64 {
        self.nanos.load(Ordering::Acquire) / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_both_sources() {
        let clock = ManualClock::new();
        assert_eq!(clock.nano_time(), 0);
        assert_eq!(clock.epoch_millis(), 0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.nano_time(), 1_500_000_000);
        assert_eq!(clock.epoch_millis(), 1500);

        clock.set_nanos(42_000_000);
        assert_eq!(clock.epoch_millis(), 42);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.nano_time();
        let b = clock.nano_time();
        assert!(b >= a);
        assert!(clock.epoch_millis() > 0);
    }
}
