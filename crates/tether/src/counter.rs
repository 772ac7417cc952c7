// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counter handles.
//!
//! A counter is a 128-byte slot in the CnC counter-values section allocated
//! by the driver. The handle reads and writes the slot directly.

use crate::cnc::Cnc;
use crate::conductor::ClientConductor;
use crate::error::{Error, Result};
use crate::handle::HandleState;
use std::sync::{Arc, Weak};

#[derive(Debug)]
pub(crate) struct CounterInner {
    conductor: Weak<ClientConductor>,
    cnc: Arc<Cnc>,
    registration_id: i64,
    counter_id: i32,
    pub(crate) state: HandleState,
}

impl CounterInner {
    pub(crate) fn new(
        conductor: Weak<ClientConductor>,
        cnc: Arc<Cnc>,
        registration_id: i64,
        counter_id: i32,
    ) -> Self {
        Self {
            conductor,
            cnc,
            registration_id,
            counter_id,
            state: HandleState::new(),
        }
    }

    pub(crate) fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub(crate) fn counter_id(&self) -> i32 {
        self.counter_id
    }
}

/// Driver-allocated counter owned by this client.
#[derive(Clone, Debug)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    pub(crate) fn from_inner(inner: Arc<CounterInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.inner.registration_id
    }

    #[must_use]
    pub fn counter_id(&self) -> i32 {
        self.inner.counter_id
    }

    /// # Errors
    ///
    /// `AlreadyClosed` (or the termination reason) once closed.
    pub fn get(&self) -> Result<i64> {
        self.inner.state.ensure_open()?;
        self.inner.cnc.counter_value(self.inner.counter_id)
    }

    /// # Errors
    ///
    /// `AlreadyClosed` (or the termination reason) once closed.
    pub fn set(&self, value: i64) -> Result<()> {
        self.inner.state.ensure_open()?;
        self.inner.cnc.set_counter_value(self.inner.counter_id, value)
    }

    /// Add `delta`, returning the previous value.
    ///
    /// # Errors
    ///
    /// `AlreadyClosed` (or the termination reason) once closed.
    pub fn add(&self, delta: i64) -> Result<i64> {
        self.inner.state.ensure_open()?;
        self.inner.cnc.add_counter_value(self.inner.counter_id, delta)
    }

    /// # Errors
    ///
    /// `AlreadyClosed` (or the termination reason) once closed.
    pub fn increment(&self) -> Result<i64> {
        self.add(1)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Ask the driver to free the counter.
    ///
    /// Idempotent: closing an already closed handle is a no-op.
    ///
    /// # Errors
    ///
    /// `ChannelFull` if the remove command could not be written; the
    /// handle stays open and the close may be retried.
    pub fn close(&self) -> Result<()> {
        match self.inner.conductor.upgrade() {
            Some(conductor) => conductor.release_counter(&self.inner),
            None => {
                self.inner.state.invalidate(Error::ClientClosed);
                Ok(())
            }
        }
    }
}
