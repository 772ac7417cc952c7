// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live resources owned by the conductor.
//!
//! Handles are inserted by the conductor loop on resolution and removed on
//! close. Log buffer mappings are cached by the driver's original
//! registration id so that several adds of the same publication share one
//! mapping; the cache holds weak references and never keeps a log alive.

use crate::counter::CounterInner;
use crate::error::{Error, Result};
use crate::logbuffer::LogBuffers;
use crate::publication::PublicationInner;
use crate::subscription::SubscriptionInner;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// A resolved handle of any kind.
#[derive(Clone, Debug)]
pub(crate) enum Resource {
    Publication(Arc<PublicationInner>),
    ExclusivePublication(Arc<PublicationInner>),
    Subscription(Arc<SubscriptionInner>),
    Counter(Arc<CounterInner>),
}

impl Resource {
    /// `Ok` while open, otherwise the reason the handle was closed.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self {
            Self::Publication(p) | Self::ExclusivePublication(p) => p.state.ensure_open(),
            Self::Subscription(s) => s.state.ensure_open(),
            Self::Counter(c) => c.state.ensure_open(),
        }
    }

    pub(crate) fn invalidate(&self, reason: Error) {
        match self {
            Self::Publication(p) | Self::ExclusivePublication(p) => p.invalidate(reason),
            Self::Subscription(s) => s.invalidate(reason),
            Self::Counter(c) => {
                c.state.invalidate(reason);
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    resources: DashMap<i64, Resource>,
    log_buffers: DashMap<i64, Weak<LogBuffers>>,
}

impl ResourceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, registration_id: i64, resource: Resource) {
        self.resources.insert(registration_id, resource);
    }

    pub(crate) fn remove(&self, registration_id: i64) -> Option<Resource> {
        self.resources.remove(&registration_id).map(|(_, r)| r)
    }

    pub(crate) fn get(&self, registration_id: i64) -> Option<Resource> {
        self.resources.get(&registration_id).map(|r| r.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }

    /// Subscription by registration id.
    pub(crate) fn subscription(&self, registration_id: i64) -> Option<Arc<SubscriptionInner>> {
        match self.get(registration_id)? {
            Resource::Subscription(s) => Some(s),
            _ => None,
        }
    }

    /// Counter by registration id.
    pub(crate) fn counter(&self, registration_id: i64) -> Option<Arc<CounterInner>> {
        match self.get(registration_id)? {
            Resource::Counter(c) => Some(c),
            _ => None,
        }
    }

    /// Live mapping for `original_registration_id`, if any handle still holds it.
    pub(crate) fn cached_log_buffers(&self, original_registration_id: i64) -> Option<Arc<LogBuffers>> {
        let cached = self
            .log_buffers
            .get(&original_registration_id)
            .and_then(|w| w.upgrade());
        if cached.is_none() {
            self.log_buffers.remove(&original_registration_id);
        }
        cached
    }

    pub(crate) fn cache_log_buffers(&self, original_registration_id: i64, log: &Arc<LogBuffers>) {
        self.log_buffers
            .insert(original_registration_id, Arc::downgrade(log));
    }

    /// Forget the mapping once no handle holds it.
    pub(crate) fn prune_log_buffers(&self, original_registration_id: i64) {
        self.log_buffers
            .remove_if(&original_registration_id, |_, w| w.strong_count() == 0);
    }

    pub(crate) fn log_mapping_count(&self) -> usize {
        self.log_buffers.len()
    }

    /// Remove every resource, returning them for invalidation.
    pub(crate) fn drain(&self) -> Vec<Resource> {
        let ids: Vec<i64> = self.resources.iter().map(|e| *e.key()).collect();
        let drained = ids.into_iter().filter_map(|id| self.remove(id)).collect();
        self.log_buffers.clear();
        drained
    }
}
