// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription handles and the images attached to them.

use crate::conductor::ClientConductor;
use crate::error::{Error, Result};
use crate::handle::HandleState;
use crate::logbuffer::LogBuffers;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback invoked on the conductor thread when an image comes or goes.
///
/// Must not block and must not close the client.
pub type ImageHandler = Arc<dyn Fn(&Image) + Send + Sync>;

/// Optional image callbacks registered with an add-subscription call.
#[derive(Clone, Default)]
pub struct ImageHandlers {
    pub on_available: Option<ImageHandler>,
    pub on_unavailable: Option<ImageHandler>,
}

impl fmt::Debug for ImageHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandlers")
            .field("on_available", &self.on_available.is_some())
            .field("on_unavailable", &self.on_unavailable.is_some())
            .finish()
    }
}

/// A remote publisher's stream as seen by one subscription.
#[derive(Clone, Debug)]
pub struct Image {
    correlation_id: i64,
    session_id: i32,
    subscriber_position_id: i32,
    source_identity: String,
    log_buffers: Arc<LogBuffers>,
}

impl Image {
    pub(crate) fn new(
        correlation_id: i64,
        session_id: i32,
        subscriber_position_id: i32,
        source_identity: String,
        log_buffers: Arc<LogBuffers>,
    ) -> Self {
        Self {
            correlation_id,
            session_id,
            subscriber_position_id,
            source_identity,
            log_buffers,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    #[must_use]
    pub fn subscriber_position_id(&self) -> i32 {
        self.subscriber_position_id
    }

    /// Address (or other identity) of the remote source.
    #[must_use]
    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    #[must_use]
    pub fn log_buffers(&self) -> &Arc<LogBuffers> {
        &self.log_buffers
    }
}

#[derive(Debug)]
pub(crate) struct SubscriptionInner {
    conductor: Weak<ClientConductor>,
    registration_id: i64,
    channel: String,
    stream_id: i32,
    channel_status_indicator_id: i32,
    images: Mutex<Vec<Image>>,
    handlers: ImageHandlers,
    pub(crate) state: HandleState,
}

impl SubscriptionInner {
    pub(crate) fn new(
        conductor: Weak<ClientConductor>,
        registration_id: i64,
        channel: String,
        stream_id: i32,
        channel_status_indicator_id: i32,
        handlers: ImageHandlers,
    ) -> Self {
        Self {
            conductor,
            registration_id,
            channel,
            stream_id,
            channel_status_indicator_id,
            images: Mutex::new(Vec::new()),
            handlers,
            state: HandleState::new(),
        }
    }

    pub(crate) fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub(crate) fn has_image(&self, correlation_id: i64) -> bool {
        self.images
            .lock()
            .iter()
            .any(|i| i.correlation_id == correlation_id)
    }

    /// Attach an image unless one with the same correlation id exists.
    pub(crate) fn add_image(&self, image: Image) {
        {
            let mut images = self.images.lock();
            if images.iter().any(|i| i.correlation_id == image.correlation_id) {
                return;
            }
            images.push(image.clone());
        }
        if let Some(handler) = &self.handlers.on_available {
            handler(&image);
        }
    }

    pub(crate) fn remove_image(&self, correlation_id: i64) -> bool {
        let removed = {
            let mut images = self.images.lock();
            images
                .iter()
                .position(|i| i.correlation_id == correlation_id)
                .map(|index| images.remove(index))
        };
        match removed {
            Some(image) => {
                if let Some(handler) = &self.handlers.on_unavailable {
                    handler(&image);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn invalidate(&self, reason: Error) {
        if self.state.invalidate(reason) {
            self.images.lock().clear();
        }
    }

    pub(crate) fn clear_images(&self) {
        self.images.lock().clear();
    }
}

/// Registered interest in a channel and stream.
#[derive(Clone, Debug)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn from_inner(inner: Arc<SubscriptionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.inner.registration_id
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
    pub fn channel_status_indicator_id(&self) -> i32 {
        self.inner.channel_status_indicator_id
    }

    /// Snapshot of the currently available images.
    #[must_use]
    pub fn images(&self) -> Vec<Image> {
        self.inner.images.lock().clone()
    }

    #[must_use]
    pub fn image_count(&self) -> usize {
        self.inner.images.lock().len()
    }

    #[must_use]
    pub fn image_by_session_id(&self, session_id: i32) -> Option<Image> {
        self.inner
            .images
            .lock()
            .iter()
            .find(|i| i.session_id == session_id)
            .cloned()
    }

    /// Whether at least one image is available.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.images.lock().is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Ask the driver to remove the subscription and drop its images.
    ///
    /// Idempotent: closing an already closed handle is a no-op.
    ///
    /// # Errors
    ///
    /// `ChannelFull` if the remove command could not be written; the
    /// handle stays open and the close may be retried.
    pub fn close(&self) -> Result<()> {
        match self.inner.conductor.upgrade() {
            Some(conductor) => conductor.release_subscription(&self.inner),
            None => {
                self.inner.invalidate(Error::ClientClosed);
                Ok(())
            }
        }
    }
}
