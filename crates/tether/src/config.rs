// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client configuration - single source of truth.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Layout and timing constants shared with the driver.
//! - **Level 2 (Dynamic)**: [`Context`], assembled once by [`ContextBuilder`]
//!   from defaults, `TETHER_*` environment variables and explicit builder calls
//!   (in increasing order of precedence).
//!
//! # Example
//!
//! ```ignore
//! use tether::config::Context;
//! use std::time::Duration;
//!
//! let ctx = Context::builder()
//!     .dir("/dev/shm/tether-alice")
//!     .driver_timeout(Duration::from_secs(5))
//!     .use_invoker(true)
//!     .build()?;
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// Timing defaults
// =======================================================================

/// Driver is declared dead after this long without a heartbeat.
pub const DEFAULT_DRIVER_TIMEOUT_MS: u64 = 10_000;

/// Interval between client keepalive commands.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 500;

/// Maximum gap between two conductor iterations before the client closes itself.
pub const DEFAULT_INTER_SERVICE_TIMEOUT_MS: u64 = 10_000;

/// Sleep of the background runner after an iteration with no work.
pub const DEFAULT_IDLE_SLEEP_US: u64 = 1_000;

/// Broadcast records processed per conductor iteration.
pub const DEFAULT_RESPONSE_DRAIN_LIMIT: usize = 10;

// =======================================================================
// Filesystem
// =======================================================================

/// Name of the command-and-control file inside the driver directory.
pub const CNC_FILE: &str = "cnc.dat";

/// Environment variable overriding the driver directory.
pub const ENV_DIR: &str = "TETHER_DIR";
/// Environment variable overriding the driver timeout (milliseconds).
pub const ENV_DRIVER_TIMEOUT_MS: &str = "TETHER_DRIVER_TIMEOUT_MS";
/// Environment variable overriding the keepalive interval (milliseconds).
pub const ENV_KEEPALIVE_INTERVAL_MS: &str = "TETHER_KEEPALIVE_INTERVAL_MS";
/// Environment variable overriding the runner idle sleep (microseconds).
pub const ENV_IDLE_SLEEP_US: &str = "TETHER_IDLE_SLEEP_US";

/// Default driver directory: `/dev/shm/tether-<user>` where shm is available,
/// otherwise under the system temp directory.
#[must_use]
pub fn default_dir() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "default".to_string());
    let name = format!("tether-{user}");

    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

/// Callback receiving errors that cannot be attached to a single command.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback invoked when the driver withdraws a counter: `(registration_id, counter_id)`.
pub type UnavailableCounterHandler = Arc<dyn Fn(i64, i32) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|e: &Error| log::error!("[tether] {}", e))
}

/// Resolved client configuration.
#[derive(Clone)]
pub struct Context {
    dir: PathBuf,
    driver_timeout: Duration,
    keepalive_interval: Duration,
    inter_service_timeout: Duration,
    idle_sleep: Duration,
    response_drain_limit: usize,
    use_invoker: bool,
    error_handler: ErrorHandler,
    unavailable_counter_handler: Option<UnavailableCounterHandler>,
    clock: Arc<dyn Clock>,
}

impl Context {
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the CnC file.
    #[must_use]
    pub fn cnc_file(&self) -> PathBuf {
        self.dir.join(CNC_FILE)
    }

    #[must_use]
    pub fn driver_timeout(&self) -> Duration {
        self.driver_timeout
    }

    #[must_use]
    pub fn driver_timeout_ms(&self) -> i64 {
        i64::try_from(self.driver_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    #[must_use]
    pub fn inter_service_timeout(&self) -> Duration {
        self.inter_service_timeout
    }

    #[must_use]
    pub fn idle_sleep(&self) -> Duration {
        self.idle_sleep
    }

    #[must_use]
    pub fn response_drain_limit(&self) -> usize {
        self.response_drain_limit
    }

    /// Whether the application drives the conductor itself (invoker mode).
    #[must_use]
    pub fn use_invoker(&self) -> bool {
        self.use_invoker
    }

    #[must_use]
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    #[must_use]
    pub fn unavailable_counter_handler(&self) -> Option<&UnavailableCounterHandler> {
        self.unavailable_counter_handler.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dir", &self.dir)
            .field("driver_timeout", &self.driver_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("inter_service_timeout", &self.inter_service_timeout)
            .field("idle_sleep", &self.idle_sleep)
            .field("response_drain_limit", &self.response_drain_limit)
            .field("use_invoker", &self.use_invoker)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Context`].
#[derive(Default)]
pub struct ContextBuilder {
    dir: Option<PathBuf>,
    driver_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    inter_service_timeout: Option<Duration>,
    idle_sleep: Option<Duration>,
    response_drain_limit: Option<usize>,
    use_invoker: bool,
    error_handler: Option<ErrorHandler>,
    unavailable_counter_handler: Option<UnavailableCounterHandler>,
    clock: Option<Arc<dyn Clock>>,
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[config] ignoring {}={:?}: not an integer", name, raw);
            None
        }
    }
}

impl ContextBuilder {
    /// Driver directory holding `cnc.dat`.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn inter_service_timeout(mut self, timeout: Duration) -> Self {
        self.inter_service_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = Some(sleep);
        self
    }

    #[must_use]
    pub fn response_drain_limit(mut self, limit: usize) -> Self {
        self.response_drain_limit = Some(limit);
        self
    }

    /// Drive the conductor from application code instead of a background thread.
    #[must_use]
    pub fn use_invoker(mut self, use_invoker: bool) -> Self {
        self.use_invoker = use_invoker;
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn unavailable_counter_handler(mut self, handler: UnavailableCounterHandler) -> Self {
        self.unavailable_counter_handler = Some(handler);
        self
    }

    /// Inject a clock (tests use [`ManualClock`](crate::clock::ManualClock)).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve defaults and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero timeouts, a keepalive interval not
    /// shorter than the driver timeout, or a zero drain limit.
    pub fn build(self) -> Result<Context> {
        let dir = self
            .dir
            .or_else(|| std::env::var(ENV_DIR).ok().map(PathBuf::from))
            .unwrap_or_else(default_dir);

        let driver_timeout = self.driver_timeout.unwrap_or_else(|| {
            Duration::from_millis(env_u64(ENV_DRIVER_TIMEOUT_MS).unwrap_or(DEFAULT_DRIVER_TIMEOUT_MS))
        });
        let keepalive_interval = self.keepalive_interval.unwrap_or_else(|| {
            Duration::from_millis(
                env_u64(ENV_KEEPALIVE_INTERVAL_MS).unwrap_or(DEFAULT_KEEPALIVE_INTERVAL_MS),
            )
        });
        let idle_sleep = self.idle_sleep.unwrap_or_else(|| {
            Duration::from_micros(env_u64(ENV_IDLE_SLEEP_US).unwrap_or(DEFAULT_IDLE_SLEEP_US))
        });
        let inter_service_timeout = self
            .inter_service_timeout
            .unwrap_or(Duration::from_millis(DEFAULT_INTER_SERVICE_TIMEOUT_MS));
        let response_drain_limit = self
            .response_drain_limit
            .unwrap_or(DEFAULT_RESPONSE_DRAIN_LIMIT);

        if driver_timeout.is_zero() || inter_service_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "driver and inter-service timeouts must be non-zero".to_string(),
            ));
        }
        if keepalive_interval >= driver_timeout {
            return Err(Error::InvalidArgument(format!(
                "keepalive interval {keepalive_interval:?} must be shorter than driver timeout {driver_timeout:?}"
            )));
        }
        if response_drain_limit == 0 {
            return Err(Error::InvalidArgument(
                "response drain limit must be at least 1".to_string(),
            ));
        }

        Ok(Context {
            dir,
            driver_timeout,
            keepalive_interval,
            inter_service_timeout,
            idle_sleep,
            response_drain_limit,
            use_invoker: self.use_invoker,
            error_handler: self.error_handler.unwrap_or_else(default_error_handler),
            unavailable_counter_handler: self.unavailable_counter_handler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
        })
    }
}
