// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Async registration table.
//!
//! Every add-* call creates one [`AsyncCommand`] keyed by its correlation id
//! and inserts it before the command is written, so a response can never
//! arrive for an id the conductor does not know yet.
//!
//! # Concurrency
//!
//! - Application threads insert (and remove on a failed write).
//! - Only the conductor loop changes a command's state; it stores the
//!   outcome first and then publishes the state with Release ordering.
//! - [`AsyncAdd::poll`] loads the state with Acquire and reads the outcome.
//!
//! A command leaves the table as soon as it reaches a terminal state. A late
//! or duplicate response for its id then finds nothing and is ignored.

use super::resources::Resource;
use super::ClientConductor;
use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::publication::{ExclusivePublication, Publication};
use crate::subscription::{ImageHandlers, Subscription};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Resource kind requested by a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Publication,
    ExclusivePublication,
    Subscription,
    Counter,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publication => write!(f, "publication"),
            Self::ExclusivePublication => write!(f, "exclusive-publication"),
            Self::Subscription => write!(f, "subscription"),
            Self::Counter => write!(f, "counter"),
        }
    }
}

/// Resolution state of an async command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandState {
    /// Waiting for the driver.
    Pending = 0,
    /// Driver answered; log buffer not mappable yet.
    PendingLogMapping = 1,
    /// Handle created.
    Resolved = 2,
    /// Driver rejected the command or the log buffer is invalid.
    Errored = 3,
    /// Driver timeout or client termination.
    TimedOut = 4,
}

impl CommandState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::PendingLogMapping,
            2 => Self::Resolved,
            3 => Self::Errored,
            _ => Self::TimedOut,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Errored | Self::TimedOut)
    }
}

pub(crate) struct AsyncCommand {
    registration_id: i64,
    kind: CommandKind,
    channel: String,
    stream_id: i32,
    submit_time_ns: i64,
    image_handlers: ImageHandlers,
    state: AtomicU8,
    outcome: OnceLock<Result<Resource>>,
}

impl fmt::Debug for AsyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCommand")
            .field("registration_id", &self.registration_id)
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AsyncCommand {
    pub(crate) fn new(
        registration_id: i64,
        kind: CommandKind,
        channel: String,
        stream_id: i32,
        submit_time_ns: i64,
        image_handlers: ImageHandlers,
    ) -> Self {
        Self {
            registration_id,
            kind,
            channel,
            stream_id,
            submit_time_ns,
            image_handlers,
            state: AtomicU8::new(CommandState::Pending as u8),
            outcome: OnceLock::new(),
        }
    }

    pub(crate) fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub(crate) fn kind(&self) -> CommandKind {
        self.kind
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub(crate) fn submit_time_ns(&self) -> i64 {
        self.submit_time_ns
    }

    pub(crate) fn image_handlers(&self) -> &ImageHandlers {
        &self.image_handlers
    }

    pub(crate) fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_pending_log_mapping(&self) {
        self.state
            .store(CommandState::PendingLogMapping as u8, Ordering::Release);
    }

    /// Latch the handle. Loop thread only.
    pub(crate) fn resolve(&self, resource: Resource) {
        if self.outcome.set(Ok(resource)).is_ok() {
            self.state
                .store(CommandState::Resolved as u8, Ordering::Release);
        }
    }

    /// Latch a failure. Loop thread only.
    pub(crate) fn fail(&self, error: Error) {
        let state = if error.is_terminal() {
            CommandState::TimedOut
        } else {
            CommandState::Errored
        };
        if self.outcome.set(Err(error)).is_ok() {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    fn outcome(&self) -> Option<&Result<Resource>> {
        if self.state().is_terminal() {
            self.outcome.get()
        } else {
            None
        }
    }
}

/// Correlation id → in-flight command.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    commands: DashMap<i64, Arc<AsyncCommand>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, command: Arc<AsyncCommand>) {
        self.commands.insert(command.registration_id, command);
    }

    pub(crate) fn get(&self, registration_id: i64) -> Option<Arc<AsyncCommand>> {
        self.commands.get(&registration_id).map(|c| Arc::clone(c.value()))
    }

    pub(crate) fn remove(&self, registration_id: i64) -> Option<Arc<AsyncCommand>> {
        self.commands.remove(&registration_id).map(|(_, c)| c)
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    /// Commands the driver has not answered yet.
    pub(crate) fn awaiting_response(&self) -> Vec<Arc<AsyncCommand>> {
        self.commands
            .iter()
            .filter(|e| e.value().state() == CommandState::Pending)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Remove every command, returning them for mass failure.
    pub(crate) fn drain(&self) -> Vec<Arc<AsyncCommand>> {
        let ids: Vec<i64> = self.commands.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Non-blocking token returned by the add-* calls.
///
/// [`poll`](Self::poll) may be called from any thread, any number of times.
/// Once it returns a handle or an error, later polls return the same result.
pub struct AsyncAdd<T> {
    command: Arc<AsyncCommand>,
    conductor: Weak<ClientConductor>,
    convert: fn(&Resource) -> Option<T>,
}

impl<T> fmt::Debug for AsyncAdd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAdd")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl<T> AsyncAdd<T> {
    pub(crate) fn new(
        command: Arc<AsyncCommand>,
        conductor: Weak<ClientConductor>,
        convert: fn(&Resource) -> Option<T>,
    ) -> Self {
        Self {
            command,
            conductor,
            convert,
        }
    }

    /// Correlation id of the add command.
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.command.registration_id
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.command.kind
    }

    #[must_use]
    pub fn state(&self) -> CommandState {
        self.command.state()
    }

    /// Query the command without blocking.
    ///
    /// - `Ok(None)`: not resolved yet (including a pending log mapping)
    /// - `Ok(Some(handle))`: resolved
    /// - `Err(e)`: permanent failure, latched
    ///
    /// # Errors
    ///
    /// `DriverError`, `DriverTimeout`, `ResourceMapping`, `ClientTimeout`,
    /// `ClientClosed`, or `AlreadyClosed` (or the termination reason) if the
    /// resolved handle has since been closed.
    pub fn poll(&self) -> Result<Option<T>> {
        match self.command.outcome() {
            Some(Ok(resource)) => {
                resource.ensure_open()?;
                (self.convert)(resource).map(Some).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "registration {} resolved to a different resource kind",
                        self.command.registration_id
                    ))
                })
            }
            Some(Err(e)) => Err(e.clone()),
            None => match self.conductor.upgrade() {
                // Added after the conductor swept its table on termination.
                Some(conductor) => match conductor.termination_reason() {
                    Some(reason) => Err(reason),
                    None => Ok(None),
                },
                None => Err(Error::ClientClosed),
            },
        }
    }
}

pub(crate) fn to_publication(resource: &Resource) -> Option<Publication> {
    match resource {
        Resource::Publication(inner) => Some(Publication::from_inner(Arc::clone(inner))),
        _ => None,
    }
}

pub(crate) fn to_exclusive_publication(resource: &Resource) -> Option<ExclusivePublication> {
    match resource {
        Resource::ExclusivePublication(inner) => {
            Some(ExclusivePublication::from_inner(Arc::clone(inner)))
        }
        _ => None,
    }
}

pub(crate) fn to_subscription(resource: &Resource) -> Option<Subscription> {
    match resource {
        Resource::Subscription(inner) => Some(Subscription::from_inner(Arc::clone(inner))),
        _ => None,
    }
}

pub(crate) fn to_counter(resource: &Resource) -> Option<Counter> {
    match resource {
        Resource::Counter(inner) => Some(Counter::from_inner(Arc::clone(inner))),
        _ => None,
    }
}

/// Pending add of a [`Publication`].
pub type AsyncAddPublication = AsyncAdd<Publication>;
/// Pending add of an [`ExclusivePublication`].
pub type AsyncAddExclusivePublication = AsyncAdd<ExclusivePublication>;
/// Pending add of a [`Subscription`].
pub type AsyncAddSubscription = AsyncAdd<Subscription>;
/// Pending add of a [`Counter`].
pub type AsyncAddCounter = AsyncAdd<Counter>;
