// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Open/closed state shared by every resource handle.
//!
//! ```text
//!   OPEN --begin_close--> CLOSING --finish_close--> CLOSED
//!     ^                      |
//!     +-----abort_close------+   (remove command could not be written)
//!
//!   OPEN --invalidate(reason)--> CLOSED   (driver timeout, termination)
//!
//!   CLOSING --invalidate(reason)--> INVALIDATED --abort_close--> CLOSED
//!                                        |
//!                                        +------finish_close-----> CLOSED
//! ```
//!
//! A handle invalidated while its close is in flight never reopens.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;
const INVALIDATED: u8 = 3;

#[derive(Debug, Default)]
pub(crate) struct HandleState {
    state: AtomicU8,
    reason: OnceLock<Error>,
}

impl HandleState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }

    /// Claim the close. Only one caller ever wins.
    pub(crate) fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undo a claimed close. Returns `false` if the handle was invalidated
    /// meanwhile, in which case it ends up closed instead.
    pub(crate) fn abort_close(&self) -> bool {
        match self
            .state
            .compare_exchange(CLOSING, OPEN, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(INVALIDATED) => {
                self.finish_close();
                false
            }
            Err(_) => false,
        }
    }

    pub(crate) fn finish_close(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Close without a remove command, latching `reason` for later calls.
    ///
    /// Returns `true` only when this call closed an open handle. A handle
    /// caught mid-close keeps `reason` and is marked so a failed close cannot
    /// reopen it.
    pub(crate) fn invalidate(&self, reason: Error) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                OPEN => {
                    if self.begin_close() {
                        let _ = self.reason.set(reason);
                        self.finish_close();
                        return true;
                    }
                }
                CLOSING => {
                    let _ = self.reason.set(reason.clone());
                    if self
                        .state
                        .compare_exchange(CLOSING, INVALIDATED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    /// `Ok` while open, otherwise the latched reason or `AlreadyClosed`.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if !self.is_closed() {
            return Ok(());
        }
        Err(self.reason.get().cloned().unwrap_or(Error::AlreadyClosed))
    }
}
