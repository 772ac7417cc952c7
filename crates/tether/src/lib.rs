// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Tether - client conductor for a shared-memory messaging driver
//!
//! Tether lets an application register, discover readiness of, and tear down
//! publications, exclusive publications, subscriptions and counters that a
//! separate driver process creates. Client and driver talk only through
//! shared memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::{Client, Context, Result};
//!
//! fn main() -> Result<()> {
//!     let client = Client::connect(Context::builder().build()?)?;
//!
//!     let pending = client.async_add_subscription("aeron:ipc", 1001)?;
//!     let subscription = loop {
//!         if let Some(subscription) = pending.poll()? {
//!             break subscription;
//!         }
//!         std::thread::yield_now();
//!     };
//!
//!     println!("images: {}", subscription.image_count());
//!     subscription.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Application threads: async_add_*() -> AsyncAdd::poll() -> close()  |
//! +---------------------------------------------------------------------+
//! |  ClientConductor (AgentRunner thread or AgentInvoker)               |
//! |    Registry (in-flight commands) | ResourceTable | LivenessMonitor  |
//! +---------------------------------------------------------------------+
//! |  DriverProxy --> ring buffer       broadcast buffer --> Response    |
//! +---------------------------------------------------------------------+
//! |  CnC region (cnc.dat)               log buffers (*.logbuffer)       |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Connection to a driver, factory for async adds |
//! | [`Context`] | Configuration (directory, timeouts, handlers, clock) |
//! | [`AsyncAdd`] | Non-blocking token polled for the resulting handle |
//! | [`Publication`] / [`ExclusivePublication`] | Mapped publication log |
//! | [`Subscription`] | Channel/stream interest with its [`Image`]s |
//! | [`Counter`] | Driver-allocated counter slot |
//!
//! ## Modules Overview
//!
//! - [`conductor`] - command/response correlation, timeouts, lifecycle
//! - [`protocol`] - command and response records
//! - [`concurrent`] - ring buffer and broadcast buffer over shared memory
//! - [`cnc`] / [`logbuffer`] - shared file layouts

pub mod agent;
pub mod clock;
pub mod cnc;
pub mod concurrent;
pub mod conductor;
pub mod config;
pub mod driver_proxy;
pub mod error;
pub mod logbuffer;
pub mod mapped;
pub mod protocol;

mod client;
mod counter;
mod handle;
mod publication;
mod subscription;

pub use agent::{Agent, AgentInvoker, AgentRunner};
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conductor::{
    AsyncAdd, AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication,
    AsyncAddSubscription, ClientConductor, CommandKind, CommandState,
};
pub use config::{Context, ContextBuilder, ErrorHandler, UnavailableCounterHandler};
pub use counter::Counter;
pub use error::{Error, ErrorCode, Result};
pub use logbuffer::LogBuffers;
pub use publication::{ExclusivePublication, Publication};
pub use subscription::{Image, ImageHandler, ImageHandlers, Subscription};
