// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publication handles.
//!
//! A handle is only created once the driver has announced the publication
//! AND its log buffer has been mapped and validated. Handles are cheap to
//! clone; the mapping is released when the handle is closed and the last
//! clone holding the log buffers goes away.
//!
//! The data path (claiming and committing frames) is not part of this crate.

use crate::cnc::Cnc;
use crate::conductor::ClientConductor;
use crate::error::{Error, Result};
use crate::handle::HandleState;
use crate::logbuffer::LogBuffers;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// State shared by [`Publication`] and [`ExclusivePublication`].
#[derive(Debug)]
pub(crate) struct PublicationInner {
    conductor: Weak<ClientConductor>,
    cnc: Arc<Cnc>,
    registration_id: i64,
    original_registration_id: i64,
    channel: String,
    stream_id: i32,
    session_id: i32,
    position_limit_counter_id: i32,
    channel_status_indicator_id: i32,
    log_buffers: Mutex<Option<Arc<LogBuffers>>>,
    pub(crate) state: HandleState,
}

/// Fields announced by the driver for a ready publication.
#[derive(Debug)]
pub(crate) struct PublicationParams {
    pub(crate) registration_id: i64,
    pub(crate) original_registration_id: i64,
    pub(crate) channel: String,
    pub(crate) stream_id: i32,
    pub(crate) session_id: i32,
    pub(crate) position_limit_counter_id: i32,
    pub(crate) channel_status_indicator_id: i32,
}

impl PublicationInner {
    pub(crate) fn new(
        conductor: Weak<ClientConductor>,
        cnc: Arc<Cnc>,
        params: PublicationParams,
        log_buffers: Arc<LogBuffers>,
    ) -> Self {
        Self {
            conductor,
            cnc,
            registration_id: params.registration_id,
            original_registration_id: params.original_registration_id,
            channel: params.channel,
            stream_id: params.stream_id,
            session_id: params.session_id,
            position_limit_counter_id: params.position_limit_counter_id,
            channel_status_indicator_id: params.channel_status_indicator_id,
            log_buffers: Mutex::new(Some(log_buffers)),
            state: HandleState::new(),
        }
    }

    pub(crate) fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub(crate) fn original_registration_id(&self) -> i64 {
        self.original_registration_id
    }

    /// Drop this handle's reference to the mapping.
    pub(crate) fn release_log_buffers(&self) {
        self.log_buffers.lock().take();
    }

    /// Invalidate without notifying the driver.
    pub(crate) fn invalidate(&self, reason: Error) {
        if self.state.invalidate(reason) {
            self.release_log_buffers();
        }
    }

    fn close(&self) -> Result<()> {
        match self.conductor.upgrade() {
            Some(conductor) => conductor.release_publication(self),
            None => {
                self.invalidate(Error::ClientClosed);
                Ok(())
            }
        }
    }

    fn log_buffers(&self) -> Result<Arc<LogBuffers>> {
        self.state.ensure_open()?;
        self.log_buffers
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::AlreadyClosed)
    }

    fn position_limit(&self) -> Result<i64> {
        self.state.ensure_open()?;
        self.cnc.counter_value(self.position_limit_counter_id)
    }
}

/// Generate the accessor surface shared by both publication flavours.
macro_rules! impl_publication_accessors {
    ($ty:ident) => {
        impl $ty {
            pub(crate) fn from_inner(inner: Arc<PublicationInner>) -> Self {
                Self { inner }
            }

            /// Correlation id of the add command that produced this handle.
            #[must_use]
            pub fn registration_id(&self) -> i64 {
                self.inner.registration_id
            }

            /// Registration shared by all adds of the same channel and stream.
            #[must_use]
            pub fn original_registration_id(&self) -> i64 {
                self.inner.original_registration_id
            }

            #[must_use]
            pub fn channel(&self) -> &str {
                &self.inner.channel
            }

            #[must_use]
            pub fn stream_id(&self) -> i32 {
                self.inner.stream_id
            }

            #[must_use]
            pub fn session_id(&self) -> i32 {
                self.inner.session_id
            }

            #[must_use]
            pub fn position_limit_counter_id(&self) -> i32 {
                self.inner.position_limit_counter_id
            }

            #[must_use]
            pub fn channel_status_indicator_id(&self) -> i32 {
                self.inner.channel_status_indicator_id
            }

            /// Current position limit published by the driver.
            ///
            /// # Errors
            ///
            /// `AlreadyClosed` (or the termination reason) once closed.
            pub fn position_limit(&self) -> Result<i64> {
                self.inner.position_limit()
            }

            /// Mapped log buffers backing this publication.
            ///
            /// # Errors
            ///
            /// `AlreadyClosed` (or the termination reason) once closed.
            pub fn log_buffers(&self) -> Result<Arc<LogBuffers>> {
                self.inner.log_buffers()
            }

            #[must_use]
            pub fn is_closed(&self) -> bool {
                self.inner.state.is_closed()
            }

            /// Ask the driver to remove the publication and release the mapping.
            ///
            /// Idempotent: closing an already closed handle is a no-op.
            ///
            /// # Errors
            ///
            /// `ChannelFull` if the remove command could not be written; the
            /// handle stays open and the close may be retried.
            pub fn close(&self) -> Result<()> {
                self.inner.close()
            }
        }
    };
}

/// Publication that may be shared with other publishers on the same stream.
#[derive(Clone, Debug)]
pub struct Publication {
    inner: Arc<PublicationInner>,
}

/// Publication owned by a single publisher.
#[derive(Clone, Debug)]
pub struct ExclusivePublication {
    inner: Arc<PublicationInner>,
}

impl_publication_accessors!(Publication);
impl_publication_accessors!(ExclusivePublication);
