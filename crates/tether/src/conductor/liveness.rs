// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver liveness and conductor service-interval checks.
//!
//! All checks are evaluated once per conductor iteration against times the
//! caller supplies; nothing here reads a clock.

use crate::config::Context;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) struct LivenessMonitor {
    driver_timeout_ms: i64,
    driver_timeout_ns: i64,
    inter_service_timeout_ns: i64,
}

pub(crate) fn duration_ns(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl LivenessMonitor {
    pub(crate) fn new(ctx: &Context) -> Self {
        Self {
            driver_timeout_ms: ctx.driver_timeout_ms(),
            driver_timeout_ns: duration_ns(ctx.driver_timeout()),
            inter_service_timeout_ns: duration_ns(ctx.inter_service_timeout()),
        }
    }

    /// Driver is dead once `now_ms > last_heartbeat_ms + driver_timeout`.
    pub(crate) fn check_driver(&self, last_heartbeat_ms: i64, now_ms: i64) -> Result<()> {
        if now_ms > last_heartbeat_ms.saturating_add(self.driver_timeout_ms) {
            return Err(Error::DriverTimeout {
                elapsed_ms: now_ms - last_heartbeat_ms,
                timeout_ms: self.driver_timeout_ms,
            });
        }
        Ok(())
    }

    /// Conductor must be invoked at least once per inter-service timeout.
    pub(crate) fn check_service_interval(&self, last_service_ns: i64, now_ns: i64) -> Result<()> {
        let elapsed_ns = now_ns - last_service_ns;
        if elapsed_ns > self.inter_service_timeout_ns {
            return Err(Error::ServiceIntervalExceeded {
                elapsed_ns,
                timeout_ns: self.inter_service_timeout_ns,
            });
        }
        Ok(())
    }

    /// Deadline for a command the driver has not answered.
    pub(crate) fn command_expired(&self, submit_time_ns: i64, now_ns: i64) -> Option<Error> {
        let elapsed_ns = now_ns - submit_time_ns;
        if elapsed_ns > self.driver_timeout_ns {
            return Some(Error::DriverTimeout {
                elapsed_ms: elapsed_ns / 1_000_000,
                timeout_ms: self.driver_timeout_ms,
            });
        }
        None
    }
}
