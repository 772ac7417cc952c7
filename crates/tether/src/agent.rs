// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduling for the conductor loop.
//!
//! - [`AgentRunner`]: dedicated named thread calling `do_work` with an idle
//!   backoff (spin, yield, then sleep) when no work was done.
//! - [`AgentInvoker`]: the application calls [`AgentInvoker::invoke`] on its
//!   own thread, e.g. from a test that drives a manual clock.
//!
//! Both run the same `do_work`; only the caller differs.

use crate::conductor::ClientConductor;
use crate::error::{Error, Result};
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Unit of cooperative work.
pub trait Agent: Send + Sync {
    /// One bounded iteration. Returns units of work done (0 = idle).
    ///
    /// # Errors
    ///
    /// Terminal errors (see [`Error::is_terminal`]) stop a runner.
    fn do_work(&self) -> Result<usize>;

    /// Called once when the agent is stopped.
    fn on_close(&self) {}

    fn role_name(&self) -> &str;
}

impl Agent for ClientConductor {
    fn do_work(&self) -> Result<usize> {
        ClientConductor::do_work(self)
    }

    fn on_close(&self) {
        self.close();
    }

    fn role_name(&self) -> &str {
        "tether-client-conductor"
    }
}

/// Runs an agent on a dedicated thread.
///
/// Dropping the runner stops the thread and waits for it to join.
pub struct AgentRunner {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl AgentRunner {
    /// Spawn the runner thread.
    ///
    /// # Errors
    ///
    /// `Io` if the thread cannot be spawned.
    pub fn start(agent: Arc<dyn Agent>, idle_sleep: Duration) -> Result<Self> {
        let name = agent.role_name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(agent, stop_clone, idle_sleep))?;

        log::debug!("[runner] started {}", name);
        Ok(Self {
            name,
            stop,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread is still running `do_work`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal stop and join. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[runner] {} panicked", self.name);
            }
            log::debug!("[runner] stopped {}", self.name);
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(agent: Arc<dyn Agent>, stop: Arc<AtomicBool>, idle_sleep: Duration) {
    let backoff = Backoff::new();

    while !stop.load(Ordering::Acquire) {
        match agent.do_work() {
            Ok(0) => {
                if backoff.is_completed() {
                    thread::sleep(idle_sleep);
                } else {
                    backoff.snooze();
                }
            }
            Ok(_) => backoff.reset(),
            Err(e) if e.is_terminal() => {
                log::debug!("[runner] {} stopping: {}", agent.role_name(), e);
                break;
            }
            Err(e) => {
                log::debug!("[runner] {} work error: {}", agent.role_name(), e);
            }
        }
    }

    agent.on_close();
}

/// Drives an agent from the caller's thread.
pub struct AgentInvoker {
    agent: Arc<dyn Agent>,
    closed: AtomicBool,
}

impl std::fmt::Debug for AgentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("role", &self.agent.role_name())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl AgentInvoker {
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            closed: AtomicBool::new(false),
        }
    }

    /// Run one iteration of the agent.
    ///
    /// # Errors
    ///
    /// `ClientClosed` after [`close`](Self::close), otherwise whatever the
    /// agent returns.
    pub fn invoke(&self) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        self.agent.do_work()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the agent once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.agent.on_close();
        }
    }
}
