// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Client connection and scheduling modes
//!
//! Connecting through a `cnc.dat` file on disk, refusing incompatible or
//! absent drivers, and running the conductor on its own thread.

mod common;

use common::MockDriver;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tether::cnc::{self, Cnc, CncLayout};
use tether::concurrent::{broadcast, ring_buffer, ManyToOneRingBuffer};
use tether::config::CNC_FILE;
use tether::mapped::MappedFile;
use tether::protocol::Command;
use tether::{Client, Clock, Context, Error, SystemClock};

fn layout() -> CncLayout {
    CncLayout {
        to_driver_buffer_length: 4096 + ring_buffer::TRAILER_LENGTH,
        to_clients_buffer_length: 4096 + broadcast::TRAILER_LENGTH,
        counter_metadata_buffer_length: 4096,
        counter_values_buffer_length: 4096,
        error_log_buffer_length: 1024,
    }
}

/// Write a driver CnC file into `dir`; the mapping must outlive the test.
fn write_cnc(dir: &TempDir, version_override: Option<i32>) -> MappedFile {
    let layout = layout();
    let file = MappedFile::create(&dir.path().join(CNC_FILE), layout.computed_length(4096))
        .expect("create cnc file");
    cnc::initialise(&file.buffer(), &layout, 10_000_000_000, 0, 1).expect("initialise");
    if let Some(version) = version_override {
        file.buffer()
            .put_i32_ordered(cnc::CNC_VERSION_OFFSET, version);
    }
    file
}

fn quick_context(dir: &TempDir) -> Context {
    Context::builder()
        .dir(dir.path())
        .driver_timeout(Duration::from_millis(500))
        .keepalive_interval(Duration::from_millis(20))
        .use_invoker(true)
        .build()
        .expect("context")
}

#[test]
fn test_connect_through_cnc_file() {
    let dir = TempDir::new().expect("temp dir");
    let _file = write_cnc(&dir, None);

    let cnc = Cnc::map_file(&dir.path().join(CNC_FILE)).expect("map cnc");
    assert_eq!(cnc.pid(), 1);
    assert_eq!(cnc.client_liveness_timeout_ns(), 10_000_000_000);
    let ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer()).expect("ring");
    ring.set_consumer_heartbeat_time(SystemClock::new().epoch_millis());

    let client = Client::connect(quick_context(&dir)).expect("connect");
    client.invoke().expect("invoke");
    let pending = client.async_add_counter(1, &[], "on disk").expect("add counter");

    let mut commands = Vec::new();
    ring.read(
        |type_id, payload| {
            let command = Command::decode(type_id, payload).expect("decode");
            if !matches!(command, Command::ClientKeepalive { .. }) {
                commands.push(command);
            }
        },
        16,
    );
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].correlation_id(), pending.registration_id());
}

#[test]
fn test_connect_without_driver_times_out() {
    let dir = TempDir::new().expect("temp dir");
    let started = Instant::now();
    let err = Client::connect(quick_context(&dir)).expect_err("no driver");
    assert!(matches!(err, Error::DriverTimeout { .. }), "got {:?}", err);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[test]
fn test_connect_with_stale_heartbeat_times_out() {
    let dir = TempDir::new().expect("temp dir");
    let _file = write_cnc(&dir, None);
    // Heartbeat never written: the driver looks dead.
    let err = Client::connect(quick_context(&dir)).expect_err("stale driver");
    assert!(matches!(err, Error::DriverTimeout { .. }), "got {:?}", err);
}

#[test]
fn test_connect_rejects_incompatible_version() {
    let dir = TempDir::new().expect("temp dir");
    let _file = write_cnc(&dir, Some(cnc::semantic_version(9, 0, 0)));
    match Client::connect(quick_context(&dir)) {
        Err(Error::CncVersionMismatch { expected, actual }) => {
            assert_eq!(expected, cnc::CNC_VERSION);
            assert_eq!(actual, cnc::semantic_version(9, 0, 0));
        }
        other => panic!("expected version mismatch, got {:?}", other),
    }
}

#[test]
fn test_runner_thread_drives_conductor() {
    let mut driver = MockDriver::new();
    let client = driver.connect_with(
        driver
            .context()
            .use_invoker(false)
            .idle_sleep(Duration::from_micros(100)),
    );
    assert!(matches!(client.invoke(), Err(Error::InvalidArgument(_))));

    let pending = client
        .async_add_subscription("aeron:ipc", 42)
        .expect("add subscription");
    driver.single_command();
    driver.accept_subscription(pending.registration_id());

    let deadline = Instant::now() + Duration::from_secs(5);
    let subscription = loop {
        if let Some(subscription) = pending.poll().expect("poll") {
            break subscription;
        }
        assert!(Instant::now() < deadline, "runner never resolved the add");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(subscription.stream_id(), 42);

    client.close();
    assert!(client.is_closed());
    assert!(subscription.is_closed());
    assert_eq!(
        driver.single_command(),
        Command::ClientClose {
            client_id: client.client_id()
        }
    );
}

#[test]
fn test_handles_outlive_client() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client.async_add_counter(1, &[], "orphan").expect("add counter");
    driver.single_command();
    driver.accept_counter(pending.registration_id(), 3);
    client.invoke().expect("invoke");
    let counter = pending.poll().expect("poll").expect("resolved");

    drop(client);
    assert!(counter.is_closed());
    assert!(matches!(counter.get(), Err(Error::ClientClosed)));
    counter.close().expect("close after client drop");
    assert!(matches!(pending.poll(), Err(Error::ClientClosed)));
}
