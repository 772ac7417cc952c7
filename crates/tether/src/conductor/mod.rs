// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client conductor.
//!
//! Turns fire-and-forget driver commands into resource handles or latched
//! failures. The conductor loop ([`ClientConductor::do_work`]) is the only
//! writer of command state and runs one bounded iteration per call:
//!
//! ```text
//! do_work()
//!   1. service interval   last call too long ago  -> terminate
//!   2. driver liveness    heartbeat too old       -> terminate
//!   3. command deadlines  unanswered adds         -> TIMED_OUT
//!   4. drain broadcast    up to drain limit       -> dispatch by response kind
//!   5. log mappings       retry announced logs    -> RESOLVED / ERRORED
//!   6. keepalive          every keepalive interval
//! ```
//!
//! # Command state machine
//!
//! ```text
//!  PENDING --ready--> RESOLVED                       (subscription, counter)
//!  PENDING --ready--> PENDING_LOG_MAPPING --mapped--> RESOLVED   (publications)
//!  PENDING --error--> ERRORED
//!  PENDING | PENDING_LOG_MAPPING --liveness / termination--> TIMED_OUT
//! ```
//!
//! Termination (driver timeout, service interval, driver-requested client
//! timeout, client close) happens exactly once and fails every in-flight
//! command and live handle in the same iteration.
//!
//! Callbacks (error handler, image handlers, unavailable counter handler) run
//! on the conductor thread while it holds the loop lock. They must not block
//! and must not close the client.

pub(crate) mod liveness;
pub(crate) mod registry;
pub(crate) mod resources;

pub use registry::{
    AsyncAdd, AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication,
    AsyncAddSubscription, CommandKind, CommandState,
};

use crate::clock::Clock;
use crate::cnc::Cnc;
use crate::concurrent::{BroadcastReceiver, CopyBroadcastReceiver, ManyToOneRingBuffer};
use crate::config::Context;
use crate::counter::CounterInner;
use crate::driver_proxy::DriverProxy;
use crate::error::{Error, ErrorCode, Result};
use crate::logbuffer::{LogBuffers, LogMapping};
use crate::protocol::{ImageReady, PublicationReady, Response};
use crate::publication::{PublicationInner, PublicationParams};
use crate::subscription::{Image, ImageHandlers, SubscriptionInner};
use liveness::{duration_ns, LivenessMonitor};
use parking_lot::Mutex;
use registry::{AsyncCommand, Registry};
use resources::{Resource, ResourceTable};
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

/// Publication whose announced log buffer could not be mapped yet.
struct PendingMapping {
    command: Arc<AsyncCommand>,
    ready: PublicationReady,
}

/// State touched only by the conductor loop.
struct LoopState {
    receiver: CopyBroadcastReceiver,
    pending_mappings: Vec<PendingMapping>,
    last_keepalive_ns: i64,
    last_service_ns: i64,
}

/// Client side of the driver control protocol.
pub struct ClientConductor {
    ctx: Context,
    clock: Arc<dyn Clock>,
    cnc: Arc<Cnc>,
    driver_proxy: DriverProxy,
    registry: Registry,
    resources: ResourceTable,
    liveness: LivenessMonitor,
    loop_state: Mutex<LoopState>,
    termination: OnceLock<Error>,
    self_ref: Weak<ClientConductor>,
}

impl std::fmt::Debug for ClientConductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConductor")
            .field("client_id", &self.driver_proxy.client_id())
            .field("pending_commands", &self.registry.len())
            .field("resources", &self.resources.len())
            .field("termination", &self.termination.get())
            .finish_non_exhaustive()
    }
}

impl ClientConductor {
    /// Attach to a validated CnC region.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the CnC command or broadcast buffers are malformed.
    pub fn new(ctx: Context, cnc: Arc<Cnc>) -> Result<Arc<Self>> {
        let ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer())?;
        let receiver = CopyBroadcastReceiver::new(BroadcastReceiver::new(cnc.to_clients_buffer())?);
        let driver_proxy = DriverProxy::new(ring);
        let clock = Arc::clone(ctx.clock());
        let now_ns = clock.nano_time();
        let liveness = LivenessMonitor::new(&ctx);

        log::debug!(
            "[conductor] attached client_id={} driver_timeout={:?}",
            driver_proxy.client_id(),
            ctx.driver_timeout()
        );

        Ok(Arc::new_cyclic(|self_ref| Self {
            ctx,
            clock,
            cnc,
            driver_proxy,
            registry: Registry::new(),
            resources: ResourceTable::new(),
            liveness,
            loop_state: Mutex::new(LoopState {
                receiver,
                pending_mappings: Vec::new(),
                last_keepalive_ns: now_ns,
                last_service_ns: now_ns,
            }),
            termination: OnceLock::new(),
            self_ref: self_ref.clone(),
        }))
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.driver_proxy.client_id()
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub fn cnc(&self) -> &Arc<Cnc> {
        &self.cnc
    }

    /// Why the conductor stopped, if it has.
    #[must_use]
    pub fn termination_reason(&self) -> Option<Error> {
        self.termination.get().cloned()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.termination.get().is_some()
    }

    /// Commands still waiting for the driver or for their log buffer.
    #[must_use]
    pub fn pending_command_count(&self) -> usize {
        self.registry.len()
    }

    /// Live resource handles.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Publication log mappings still cached by original registration id.
    #[must_use]
    pub fn log_mapping_count(&self) -> usize {
        self.resources.log_mapping_count()
    }

    // ========================================================================
    // Application-facing submission
    // ========================================================================

    fn ensure_active(&self) -> Result<()> {
        match self.termination.get() {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn submit<F>(
        &self,
        kind: CommandKind,
        channel: &str,
        stream_id: i32,
        image_handlers: ImageHandlers,
        write: F,
    ) -> Result<Arc<AsyncCommand>>
    where
        F: FnOnce(&DriverProxy, i64) -> Result<()>,
    {
        self.ensure_active()?;

        let registration_id = self.driver_proxy.next_correlation_id();
        let command = Arc::new(AsyncCommand::new(
            registration_id,
            kind,
            channel.to_string(),
            stream_id,
            self.clock.nano_time(),
            image_handlers,
        ));

        // Registered before the write so an early response is never dropped.
        self.registry.insert(Arc::clone(&command));
        if let Err(e) = write(&self.driver_proxy, registration_id) {
            self.registry.remove(registration_id);
            return Err(e);
        }

        log::debug!(
            "[conductor] submitted {} registration_id={} channel={} stream_id={}",
            kind,
            registration_id,
            channel,
            stream_id
        );
        Ok(command)
    }

    /// Request a publication.
    ///
    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_publication(&self, channel: &str, stream_id: i32) -> Result<AsyncAddPublication> {
        let command = self.submit(
            CommandKind::Publication,
            channel,
            stream_id,
            ImageHandlers::default(),
            |proxy, id| proxy.add_publication(id, channel, stream_id),
        )?;
        Ok(AsyncAdd::new(command, self.self_ref.clone(), registry::to_publication))
    }

    /// Request an exclusive publication.
    ///
    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddExclusivePublication> {
        let command = self.submit(
            CommandKind::ExclusivePublication,
            channel,
            stream_id,
            ImageHandlers::default(),
            |proxy, id| proxy.add_exclusive_publication(id, channel, stream_id),
        )?;
        Ok(AsyncAdd::new(
            command,
            self.self_ref.clone(),
            registry::to_exclusive_publication,
        ))
    }

    /// Request a subscription with optional image callbacks.
    ///
    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_subscription(
        &self,
        channel: &str,
        stream_id: i32,
        image_handlers: ImageHandlers,
    ) -> Result<AsyncAddSubscription> {
        let command = self.submit(
            CommandKind::Subscription,
            channel,
            stream_id,
            image_handlers,
            |proxy, id| proxy.add_subscription(id, channel, stream_id),
        )?;
        Ok(AsyncAdd::new(command, self.self_ref.clone(), registry::to_subscription))
    }

    /// Request a counter.
    ///
    /// # Errors
    ///
    /// `ChannelFull` (retry), `MessageTooLarge`, or the termination reason.
    pub fn async_add_counter(&self, type_id: i32, key: &[u8], label: &str) -> Result<AsyncAddCounter> {
        let command = self.submit(
            CommandKind::Counter,
            label,
            type_id,
            ImageHandlers::default(),
            |proxy, id| proxy.add_counter(id, type_id, key, label),
        )?;
        Ok(AsyncAdd::new(command, self.self_ref.clone(), registry::to_counter))
    }

    // ========================================================================
    // Conductor loop
    // ========================================================================

    /// Run one bounded, non-blocking iteration. Returns units of work done.
    ///
    /// # Errors
    ///
    /// The termination reason once the conductor has stopped
    /// (`DriverTimeout`, `ServiceIntervalExceeded`, `ClientTimeout`,
    /// `ClientClosed`).
    pub fn do_work(&self) -> Result<usize> {
        let mut state = self.loop_state.lock();
        self.ensure_active()?;

        let now_ns = self.clock.nano_time();
        if let Err(e) = self
            .liveness
            .check_service_interval(state.last_service_ns, now_ns)
        {
            return Err(self.fatal(&mut state, e));
        }
        state.last_service_ns = now_ns;

        let heartbeat_ms = self.driver_proxy.time_of_last_driver_keepalive_ms();
        if let Err(e) = self
            .liveness
            .check_driver(heartbeat_ms, self.clock.epoch_millis())
        {
            return Err(self.fatal(&mut state, e));
        }

        let mut work = self.expire_commands(now_ns);
        work += self.drain_responses(&mut state);
        self.ensure_active()?;
        work += self.retry_log_mappings(&mut state);
        work += self.send_keepalive(&mut state, now_ns);
        Ok(work)
    }

    /// Close the client: notify the driver and fail everything still open
    /// with `ClientClosed`. Idempotent.
    pub fn close(&self) {
        let mut state = self.loop_state.lock();
        if self.termination.get().is_some() {
            return;
        }
        if let Err(e) = self.driver_proxy.client_close() {
            log::warn!("[conductor] client close not delivered to driver: {}", e);
        }
        self.terminate(&mut state, Error::ClientClosed);
    }

    /// Report a fatal condition and terminate.
    fn fatal(&self, state: &mut LoopState, error: Error) -> Error {
        if self.termination.get().is_none() {
            (self.ctx.error_handler())(&error);
        }
        self.terminate(state, error.clone());
        error
    }

    fn terminate(&self, state: &mut LoopState, reason: Error) {
        if self.termination.set(reason.clone()).is_err() {
            return;
        }

        state.pending_mappings.clear();
        let commands = self.registry.drain();
        let resources = self.resources.drain();
        log::warn!(
            "[conductor] client_id={} terminated ({}): failing {} commands, {} resources",
            self.client_id(),
            reason,
            commands.len(),
            resources.len()
        );

        for command in commands {
            command.fail(reason.clone());
        }
        for resource in resources {
            resource.invalidate(reason.clone());
        }
    }

    fn expire_commands(&self, now_ns: i64) -> usize {
        let mut expired = 0;
        for command in self.registry.awaiting_response() {
            let Some(error) = self
                .liveness
                .command_expired(command.submit_time_ns(), now_ns)
            else {
                continue;
            };
            if self.registry.remove(command.registration_id()).is_some() {
                log::warn!(
                    "[conductor] {} registration_id={} timed out: {}",
                    command.kind(),
                    command.registration_id(),
                    error
                );
                command.fail(error);
                expired += 1;
            }
        }
        expired
    }

    fn drain_responses(&self, state: &mut LoopState) -> usize {
        let mut work = 0;
        for _ in 0..self.ctx.response_drain_limit() {
            let mut decoded = None;
            let received = state.receiver.receive(|type_id, payload| {
                decoded = Some((type_id, Response::decode(type_id, payload)));
            });

            match received {
                Ok(0) => break,
                Ok(_) => work += 1,
                Err(e) => {
                    log::warn!("[conductor] broadcast receive failed: {}", e);
                    (self.ctx.error_handler())(&e);
                    continue;
                }
            }

            match decoded {
                Some((_, Some(response))) => self.on_response(state, response),
                Some((type_id, None)) => {
                    log::debug!("[conductor] ignoring broadcast type=0x{:04X}", type_id);
                }
                None => {}
            }

            if self.termination.get().is_some() {
                break;
            }
        }
        work
    }

    fn on_response(&self, state: &mut LoopState, response: Response) {
        match response {
            Response::PublicationReady(ready) => {
                self.on_publication_ready(state, ready, CommandKind::Publication);
            }
            Response::ExclusivePublicationReady(ready) => {
                self.on_publication_ready(state, ready, CommandKind::ExclusivePublication);
            }
            Response::SubscriptionReady {
                correlation_id,
                channel_status_indicator_id,
            } => self.on_subscription_ready(correlation_id, channel_status_indicator_id),
            Response::CounterReady {
                correlation_id,
                counter_id,
            } => self.on_counter_ready(correlation_id, counter_id),
            Response::OperationSuccess { correlation_id } => {
                log::trace!("[conductor] operation {} succeeded", correlation_id);
            }
            Response::Error {
                offending_correlation_id,
                code,
                message,
            } => self.on_error(offending_correlation_id, code, message),
            Response::AvailableImage(image) => self.on_available_image(image),
            Response::UnavailableImage {
                correlation_id,
                subscription_registration_id,
                ..
            } => self.on_unavailable_image(correlation_id, subscription_registration_id),
            Response::UnavailableCounter {
                registration_id,
                counter_id,
            } => self.on_unavailable_counter(registration_id, counter_id),
            Response::ClientTimeout { client_id } => {
                if client_id == self.client_id() {
                    self.fatal(state, Error::ClientTimeout);
                }
            }
        }
    }

    /// Command awaiting its first response, if `correlation_id` names one of ours.
    fn awaiting(&self, correlation_id: i64, kind: CommandKind) -> Option<Arc<AsyncCommand>> {
        let command = self.registry.get(correlation_id)?;
        if command.state() != CommandState::Pending {
            log::debug!(
                "[conductor] duplicate response for registration_id={}",
                correlation_id
            );
            return None;
        }
        if command.kind() != kind {
            log::debug!(
                "[conductor] {} response for {} registration_id={} ignored",
                kind,
                command.kind(),
                correlation_id
            );
            return None;
        }
        Some(command)
    }

    fn complete(&self, command: &AsyncCommand, resource: Resource) {
        let registration_id = command.registration_id();
        self.resources.insert(registration_id, resource.clone());
        self.registry.remove(registration_id);
        command.resolve(resource);
        log::debug!(
            "[conductor] {} registration_id={} resolved",
            command.kind(),
            registration_id
        );
    }

    fn reject(&self, command: &AsyncCommand, error: Error) {
        self.registry.remove(command.registration_id());
        log::debug!(
            "[conductor] {} registration_id={} failed: {}",
            command.kind(),
            command.registration_id(),
            error
        );
        command.fail(error);
    }

    fn on_publication_ready(&self, state: &mut LoopState, ready: PublicationReady, kind: CommandKind) {
        let Some(command) = self.awaiting(ready.correlation_id, kind) else {
            return;
        };

        match self.build_publication(&command, &ready) {
            Ok(Some(resource)) => self.complete(&command, resource),
            Ok(None) => {
                log::debug!(
                    "[conductor] registration_id={} log buffer {} not ready, will retry",
                    command.registration_id(),
                    ready.log_file
                );
                command.mark_pending_log_mapping();
                state.pending_mappings.push(PendingMapping { command, ready });
            }
            Err(e) => self.reject(&command, e),
        }
    }

    /// Map the announced log and build the handle. `Ok(None)` means retry later.
    fn build_publication(
        &self,
        command: &AsyncCommand,
        ready: &PublicationReady,
    ) -> Result<Option<Resource>> {
        let log_buffers = match self.resources.cached_log_buffers(ready.registration_id) {
            Some(log_buffers) => log_buffers,
            None => match LogBuffers::try_map(Path::new(&ready.log_file))? {
                LogMapping::Ready(log_buffers) => {
                    let log_buffers = Arc::new(log_buffers);
                    self.resources
                        .cache_log_buffers(ready.registration_id, &log_buffers);
                    log_buffers
                }
                LogMapping::NotReady => return Ok(None),
            },
        };

        let inner = Arc::new(PublicationInner::new(
            self.self_ref.clone(),
            Arc::clone(&self.cnc),
            PublicationParams {
                registration_id: command.registration_id(),
                original_registration_id: ready.registration_id,
                channel: command.channel().to_string(),
                stream_id: ready.stream_id,
                session_id: ready.session_id,
                position_limit_counter_id: ready.position_limit_counter_id,
                channel_status_indicator_id: ready.channel_status_indicator_id,
            },
            log_buffers,
        ));

        Ok(Some(match command.kind() {
            CommandKind::ExclusivePublication => Resource::ExclusivePublication(inner),
            _ => Resource::Publication(inner),
        }))
    }

    fn retry_log_mappings(&self, state: &mut LoopState) -> usize {
        if state.pending_mappings.is_empty() {
            return 0;
        }

        let mut work = 0;
        for entry in std::mem::take(&mut state.pending_mappings) {
            if entry.command.state() != CommandState::PendingLogMapping {
                continue;
            }
            match self.build_publication(&entry.command, &entry.ready) {
                Ok(Some(resource)) => {
                    self.complete(&entry.command, resource);
                    work += 1;
                }
                Ok(None) => state.pending_mappings.push(entry),
                Err(e) => {
                    self.reject(&entry.command, e);
                    work += 1;
                }
            }
        }
        work
    }

    fn on_subscription_ready(&self, correlation_id: i64, channel_status_indicator_id: i32) {
        let Some(command) = self.awaiting(correlation_id, CommandKind::Subscription) else {
            return;
        };
        let inner = Arc::new(SubscriptionInner::new(
            self.self_ref.clone(),
            command.registration_id(),
            command.channel().to_string(),
            command.stream_id(),
            channel_status_indicator_id,
            command.image_handlers().clone(),
        ));
        self.complete(&command, Resource::Subscription(inner));
    }

    fn on_counter_ready(&self, correlation_id: i64, counter_id: i32) {
        let Some(command) = self.awaiting(correlation_id, CommandKind::Counter) else {
            return;
        };
        let inner = Arc::new(CounterInner::new(
            self.self_ref.clone(),
            Arc::clone(&self.cnc),
            command.registration_id(),
            counter_id,
        ));
        self.complete(&command, Resource::Counter(inner));
    }

    fn on_error(&self, offending_correlation_id: i64, code: ErrorCode, message: String) {
        match self.registry.get(offending_correlation_id) {
            Some(command) => self.reject(&command, Error::DriverError { code, message }),
            None => log::debug!(
                "[conductor] driver error for unknown correlation_id={}: {} {}",
                offending_correlation_id,
                code,
                message
            ),
        }
    }

    fn on_available_image(&self, image: ImageReady) {
        let Some(subscription) = self
            .resources
            .subscription(image.subscription_registration_id)
        else {
            return;
        };
        if subscription.state.is_closed() || subscription.has_image(image.correlation_id) {
            return;
        }

        let log_buffers = match LogBuffers::try_map(Path::new(&image.log_file)) {
            Ok(LogMapping::Ready(log_buffers)) => Arc::new(log_buffers),
            Ok(LogMapping::NotReady) => {
                (self.ctx.error_handler())(&Error::ResourceMapping(format!(
                    "image log buffer {} not available",
                    image.log_file
                )));
                return;
            }
            Err(e) => {
                (self.ctx.error_handler())(&e);
                return;
            }
        };

        log::debug!(
            "[conductor] image correlation_id={} session_id={} available on registration_id={}",
            image.correlation_id,
            image.session_id,
            image.subscription_registration_id
        );
        subscription.add_image(Image::new(
            image.correlation_id,
            image.session_id,
            image.subscriber_position_id,
            image.source_identity,
            log_buffers,
        ));
    }

    fn on_unavailable_image(&self, correlation_id: i64, subscription_registration_id: i64) {
        if let Some(subscription) = self.resources.subscription(subscription_registration_id) {
            if subscription.remove_image(correlation_id) {
                log::debug!(
                    "[conductor] image correlation_id={} unavailable on registration_id={}",
                    correlation_id,
                    subscription_registration_id
                );
            }
        }
    }

    fn on_unavailable_counter(&self, registration_id: i64, counter_id: i32) {
        if let Some(counter) = self.resources.counter(registration_id) {
            counter.state.invalidate(Error::AlreadyClosed);
            self.resources.remove(registration_id);
            log::debug!(
                "[conductor] counter registration_id={} counter_id={} withdrawn by driver",
                registration_id,
                counter_id
            );
        }
        if let Some(handler) = self.ctx.unavailable_counter_handler() {
            handler(registration_id, counter_id);
        }
    }

    fn send_keepalive(&self, state: &mut LoopState, now_ns: i64) -> usize {
        if now_ns - state.last_keepalive_ns < duration_ns(self.ctx.keepalive_interval()) {
            return 0;
        }
        match self.driver_proxy.send_client_keepalive() {
            Ok(()) => {
                state.last_keepalive_ns = now_ns;
                1
            }
            Err(e) => {
                log::debug!("[conductor] keepalive deferred: {}", e);
                0
            }
        }
    }

    // ========================================================================
    // Handle close
    // ========================================================================

    pub(crate) fn release_publication(&self, inner: &PublicationInner) -> Result<()> {
        if !inner.state.begin_close() {
            return Ok(());
        }
        if let Err(e) = self.driver_proxy.remove_publication(inner.registration_id()) {
            if !inner.state.abort_close() {
                // terminated while the remove was being written
                inner.release_log_buffers();
            }
            return Err(e);
        }
        inner.state.finish_close();
        inner.release_log_buffers();
        self.resources.remove(inner.registration_id());
        self.resources
            .prune_log_buffers(inner.original_registration_id());
        log::debug!(
            "[conductor] publication registration_id={} original={} closed",
            inner.registration_id(),
            inner.original_registration_id()
        );
        Ok(())
    }

    pub(crate) fn release_subscription(&self, inner: &SubscriptionInner) -> Result<()> {
        if !inner.state.begin_close() {
            return Ok(());
        }
        if let Err(e) = self.driver_proxy.remove_subscription(inner.registration_id()) {
            if !inner.state.abort_close() {
                inner.clear_images();
            }
            return Err(e);
        }
        inner.state.finish_close();
        inner.clear_images();
        self.resources.remove(inner.registration_id());
        log::debug!(
            "[conductor] subscription registration_id={} closed",
            inner.registration_id()
        );
        Ok(())
    }

    pub(crate) fn release_counter(&self, inner: &CounterInner) -> Result<()> {
        if !inner.state.begin_close() {
            return Ok(());
        }
        if let Err(e) = self.driver_proxy.remove_counter(inner.registration_id()) {
            let _ = inner.state.abort_close();
            return Err(e);
        }
        inner.state.finish_close();
        self.resources.remove(inner.registration_id());
        log::debug!(
            "[conductor] counter registration_id={} counter_id={} closed",
            inner.registration_id(),
            inner.counter_id()
        );
        Ok(())
    }
}
