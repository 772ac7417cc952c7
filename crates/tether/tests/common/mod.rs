// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness: an in-process stand-in for the driver.
//!
//! The mock owns a heap CnC region, consumes commands from the to-driver ring
//! buffer, answers on the broadcast buffer and writes log files into a
//! temporary directory. Time is a [`ManualClock`] shared with the client.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether::cnc::{self, Cnc, CncLayout};
use tether::concurrent::{broadcast, ring_buffer, AlignedBuffer, BroadcastTransmitter, ManyToOneRingBuffer};
use tether::logbuffer::{self, LogParams};
use tether::protocol::{Command, PublicationReady, Response};
use tether::{Client, Clock, Context, ContextBuilder, ManualClock};

pub const DRIVER_TIMEOUT: Duration = Duration::from_millis(1_000);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);
pub const INTER_SERVICE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Clock step between two conductor iterations.
pub const STEP: Duration = Duration::from_millis(100);

const START_NANOS: i64 = 1_000_000_000_000;
const DEFAULT_RING_CAPACITY: usize = 64 * 1024;
const BROADCAST_CAPACITY: usize = 64 * 1024;
const COUNTER_SLOTS: usize = 64;

pub struct MockDriver {
    pub cnc: Arc<Cnc>,
    pub clock: Arc<ManualClock>,
    ring: ManyToOneRingBuffer,
    transmitter: BroadcastTransmitter,
    dir: TempDir,
    next_session_id: i32,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_ring_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(ring_capacity: usize) -> Self {
        let layout = CncLayout {
            to_driver_buffer_length: ring_capacity + ring_buffer::TRAILER_LENGTH,
            to_clients_buffer_length: BROADCAST_CAPACITY + broadcast::TRAILER_LENGTH,
            counter_metadata_buffer_length: COUNTER_SLOTS * 512,
            counter_values_buffer_length: COUNTER_SLOTS * cnc::COUNTER_LENGTH,
            error_log_buffer_length: 4096,
        };
        let region = Arc::new(AlignedBuffer::new(layout.computed_length(4096)));
        cnc::initialise(
            &region.atomic_buffer(),
            &layout,
            DRIVER_TIMEOUT.as_nanos() as i64,
            START_NANOS / 1_000_000,
            i64::from(std::process::id()),
        )
        .expect("initialise cnc");

        let cnc = Arc::new(Cnc::from_heap(region).expect("validate cnc"));
        let ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).expect("ring buffer");
        let transmitter = BroadcastTransmitter::new(cnc.to_clients_buffer()).expect("transmitter");

        let driver = Self {
            cnc,
            clock: Arc::new(ManualClock::starting_at(START_NANOS)),
            ring,
            transmitter,
            dir: TempDir::new().expect("temp dir"),
            next_session_id: 100,
        };
        driver.heartbeat();
        driver
    }

    /// Context preconfigured for this driver, invoker mode.
    pub fn context(&self) -> ContextBuilder {
        Context::builder()
            .dir(self.dir.path())
            .clock(self.clock.clone())
            .use_invoker(true)
            .driver_timeout(DRIVER_TIMEOUT)
            .keepalive_interval(KEEPALIVE_INTERVAL)
            .inter_service_timeout(INTER_SERVICE_TIMEOUT)
    }

    pub fn connect(&self) -> Client {
        self.connect_with(self.context())
    }

    pub fn connect_with(&self, builder: ContextBuilder) -> Client {
        let ctx = builder.build().expect("context");
        Client::with_cnc(ctx, Arc::clone(&self.cnc)).expect("client")
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Publish a fresh driver heartbeat.
    pub fn heartbeat(&self) {
        self.ring
            .set_consumer_heartbeat_time(self.clock.epoch_millis());
    }

    /// Advance one step with a live driver, then run one client iteration.
    pub fn tick(&self, client: &Client) -> tether::Result<usize> {
        self.clock.advance(STEP);
        self.heartbeat();
        client.invoke()
    }

    /// Keep the driver alive for `duration`, invoking every step.
    /// Stops at the first error.
    pub fn run_for(&self, client: &Client, duration: Duration) -> tether::Result<usize> {
        let mut work = 0;
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            work += self.tick(client)?;
            elapsed += STEP;
        }
        Ok(work)
    }

    /// Stop heartbeating for `duration` while the client keeps invoking.
    /// Returns the first error, if any.
    pub fn stall_for(&self, client: &Client, duration: Duration) -> tether::Result<usize> {
        let mut work = 0;
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            self.clock.advance(STEP);
            work += client.invoke()?;
            elapsed += STEP;
        }
        Ok(work)
    }

    /// Consume every pending command, keepalives included.
    pub fn all_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        loop {
            let read = self.ring.read(
                |type_id, payload| {
                    commands.push(Command::decode(type_id, payload).expect("decodable command"));
                },
                usize::MAX,
            );
            if read == 0 {
                break;
            }
        }
        commands
    }

    /// Consume pending commands, dropping keepalives.
    pub fn commands(&self) -> Vec<Command> {
        self.all_commands()
            .into_iter()
            .filter(|c| !matches!(c, Command::ClientKeepalive { .. }))
            .collect()
    }

    /// Exactly one non-keepalive command must be pending.
    pub fn single_command(&self) -> Command {
        let mut commands = self.commands();
        assert_eq!(commands.len(), 1, "expected one command, got {:?}", commands);
        commands.remove(0)
    }

    pub fn send(&mut self, response: &Response) {
        self.transmitter
            .transmit(response.type_id(), &response.encode())
            .expect("transmit");
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.logbuffer"))
    }

    pub fn create_log(&self, path: &Path) {
        logbuffer::create_log(path, &LogParams::default()).expect("create log");
    }

    /// Ready announcement for a publication whose log lives at `log_file`.
    pub fn publication_ready(
        &mut self,
        correlation_id: i64,
        registration_id: i64,
        stream_id: i32,
        log_file: &Path,
    ) -> PublicationReady {
        self.next_session_id += 1;
        PublicationReady {
            correlation_id,
            registration_id,
            session_id: self.next_session_id,
            stream_id,
            position_limit_counter_id: 3,
            channel_status_indicator_id: 4,
            log_file: log_file.display().to_string(),
        }
    }

    /// Create the log and announce the publication in one go.
    pub fn accept_publication(&mut self, correlation_id: i64, stream_id: i32) -> PublicationReady {
        let path = self.log_path(&format!("pub-{correlation_id}"));
        self.create_log(&path);
        let ready = self.publication_ready(correlation_id, correlation_id, stream_id, &path);
        self.send(&Response::PublicationReady(ready.clone()));
        ready
    }

    pub fn accept_subscription(&mut self, correlation_id: i64) {
        self.send(&Response::SubscriptionReady {
            correlation_id,
            channel_status_indicator_id: 5,
        });
    }

    pub fn accept_counter(&mut self, correlation_id: i64, counter_id: i32) {
        self.send(&Response::CounterReady {
            correlation_id,
            counter_id,
        });
    }
}

/// Invoke until `poll` yields a value, with a live driver. Panics after
/// `max_ticks` iterations.
pub fn resolve<T>(
    driver: &MockDriver,
    client: &Client,
    max_ticks: usize,
    mut poll: impl FnMut() -> tether::Result<Option<T>>,
) -> T {
    for _ in 0..max_ticks {
        if let Some(value) = poll().expect("poll") {
            return value;
        }
        driver.tick(client).expect("invoke");
    }
    panic!("not resolved after {max_ticks} iterations");
}
