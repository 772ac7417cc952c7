// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client entry point.
//!
//! ```no_run
//! use tether::{Client, Context};
//!
//! let ctx = Context::builder().build()?;
//! let client = Client::connect(ctx)?;
//!
//! let pending = client.async_add_publication("aeron:ipc", 1001)?;
//! let publication = loop {
//!     if let Some(publication) = pending.poll()? {
//!         break publication;
//!     }
//!     std::thread::yield_now();
//! };
//! println!("session {}", publication.session_id());
//! publication.close()?;
//! # Ok::<(), tether::Error>(())
//! ```

use crate::agent::{AgentInvoker, AgentRunner};
use crate::cnc::Cnc;
use crate::concurrent::ManyToOneRingBuffer;
use crate::conductor::{
    AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication, AsyncAddSubscription,
    ClientConductor,
};
use crate::config::Context;
use crate::error::{Error, Result};
use crate::subscription::ImageHandlers;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

enum Mode {
    Runner(Mutex<Option<AgentRunner>>),
    Invoker(AgentInvoker),
}

/// Connection to a driver.
///
/// Cheap operations (`async_add_*`, `poll`) may be called from any thread.
/// Dropping the client closes it.
pub struct Client {
    conductor: Arc<ClientConductor>,
    mode: Mode,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("conductor", &self.conductor)
            .field("invoker", &matches!(self.mode, Mode::Invoker(_)))
            .finish()
    }
}

impl Client {
    /// Map `<dir>/cnc.dat`, wait for the driver to be ready and attach.
    ///
    /// Waits up to the driver timeout for the CnC file to appear with a
    /// valid version and a fresh driver heartbeat.
    ///
    /// # Errors
    ///
    /// `DriverTimeout` if the driver does not become ready in time,
    /// `CncVersionMismatch` for an incompatible driver, `Io` for mapping
    /// failures other than a missing file.
    pub fn connect(ctx: Context) -> Result<Self> {
        let cnc = Arc::new(await_cnc(&ctx)?);
        Self::with_cnc(ctx, cnc)
    }

    /// Attach to an already mapped and validated CnC region.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed CnC buffers, `Io` if the runner
    /// thread cannot be spawned.
    pub fn with_cnc(ctx: Context, cnc: Arc<Cnc>) -> Result<Self> {
        let use_invoker = ctx.use_invoker();
        let idle_sleep = ctx.idle_sleep();
        let conductor = ClientConductor::new(ctx, cnc)?;

        let mode = if use_invoker {
            Mode::Invoker(AgentInvoker::new(conductor.clone()))
        } else {
            let runner = AgentRunner::start(conductor.clone(), idle_sleep)?;
            Mode::Runner(Mutex::new(Some(runner)))
        };

        log::info!(
            "[tether] client_id={} connected ({})",
            conductor.client_id(),
            if use_invoker { "invoker" } else { "runner" }
        );
        Ok(Self { conductor, mode })
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.conductor.client_id()
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        self.conductor.context()
    }

    #[must_use]
    pub fn conductor(&self) -> &Arc<ClientConductor> {
        &self.conductor
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conductor.is_closed()
    }

    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_publication(&self, channel: &str, stream_id: i32) -> Result<AsyncAddPublication> {
        self.conductor.async_add_publication(channel, stream_id)
    }

    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddExclusivePublication> {
        self.conductor
            .async_add_exclusive_publication(channel, stream_id)
    }

    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_subscription(&self, channel: &str, stream_id: i32) -> Result<AsyncAddSubscription> {
        self.conductor
            .async_add_subscription(channel, stream_id, ImageHandlers::default())
    }

    /// Add a subscription with image availability callbacks.
    ///
    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_subscription_with_handlers(
        &self,
        channel: &str,
        stream_id: i32,
        handlers: ImageHandlers,
    ) -> Result<AsyncAddSubscription> {
        self.conductor
            .async_add_subscription(channel, stream_id, handlers)
    }

    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_counter(&self, type_id: i32, key: &[u8], label: &str) -> Result<AsyncAddCounter> {
        self.conductor.async_add_counter(type_id, key, label)
    }

    /// Run one conductor iteration (invoker mode only).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a runner thread owns the conductor, otherwise
    /// the conductor's termination reason.
    pub fn invoke(&self) -> Result<usize> {
        match &self.mode {
            Mode::Invoker(invoker) => invoker.invoke(),
            Mode::Runner(_) => Err(Error::InvalidArgument(
                "invoke() requires a context built with use_invoker(true)".to_string(),
            )),
        }
    }

    /// Stop the conductor, notify the driver and close every handle.
    /// Idempotent.
    pub fn close(&self) {
        match &self.mode {
            Mode::Runner(runner) => {
                if let Some(mut runner) = runner.lock().take() {
                    runner.close();
                }
            }
            Mode::Invoker(invoker) => invoker.close(),
        }
        // Runner and invoker close the conductor via on_close; this covers a
        // runner that already exited on a terminal error.
        self.conductor.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait for a usable CnC file and a live driver heartbeat.
fn await_cnc(ctx: &Context) -> Result<Cnc> {
    let path = ctx.cnc_file();
    let timeout = ctx.driver_timeout();
    let deadline = Instant::now() + timeout;
    let retry_sleep = ctx.idle_sleep().max(Duration::from_millis(1));

    loop {
        match Cnc::map_file(&path) {
            Ok(cnc) => {
                let ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer())?;
                let heartbeat_ms = ring.consumer_heartbeat_time();
                let now_ms = ctx.clock().epoch_millis();
                if now_ms <= heartbeat_ms + ctx.driver_timeout_ms() {
                    log::debug!(
                        "[tether] driver pid={} ready at {}",
                        cnc.pid(),
                        path.display()
                    );
                    return Ok(cnc);
                }
                log::debug!(
                    "[tether] driver heartbeat stale by {}ms",
                    now_ms - heartbeat_ms
                );
            }
            Err(Error::CncNotReady) => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(Error::DriverTimeout {
                elapsed_ms: i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX),
                timeout_ms: ctx.driver_timeout_ms(),
            });
        }
        thread::sleep(retry_sleep);
    }
}
