// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::cast_possible_wrap)] // Test conversions
#![allow(clippy::unreadable_literal)] // Large test constants
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::match_wildcard_for_single_variants)] // Test patterns
#![allow(clippy::similar_names)] // Test variable naming

//! Async add lifecycle against a mock driver
//!
//! Covers the command state machine end to end: submission, driver ready /
//! error responses, per-command deadlines, log buffer mapping retries, and
//! the no-op handling of unknown or duplicate responses.

mod common;

use common::{resolve, MockDriver, DRIVER_TIMEOUT, STEP};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tether::logbuffer::{self, LOG_META_DATA_LENGTH, LOG_PAGE_SIZE_OFFSET, LOG_TERM_LENGTH_OFFSET};
use tether::protocol::{Command, Response};
use tether::{CommandKind, CommandState, Error, ErrorCode};

fn driver_error(code: ErrorCode, message: &str, offending_correlation_id: i64) -> Response {
    Response::Error {
        offending_correlation_id,
        code,
        message: message.to_string(),
    }
}

// ============================================================================
// Publications
// ============================================================================

#[test]
fn test_publication_resolves_after_ready() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_publication("aeron:ipc", 1001)
        .expect("add publication");
    assert_eq!(pending.kind(), CommandKind::Publication);
    assert_eq!(pending.state(), CommandState::Pending);
    assert!(pending.poll().expect("poll").is_none());

    match driver.single_command() {
        Command::AddPublication {
            client_id,
            correlation_id,
            stream_id,
            channel,
        } => {
            assert_eq!(client_id, client.client_id());
            assert_eq!(correlation_id, pending.registration_id());
            assert_eq!(stream_id, 1001);
            assert_eq!(channel, "aeron:ipc");
        }
        other => panic!("unexpected command {:?}", other),
    }

    let ready = driver.accept_publication(pending.registration_id(), 1001);
    client.invoke().expect("invoke");

    let publication = pending.poll().expect("poll").expect("resolved");
    assert_eq!(pending.state(), CommandState::Resolved);
    assert_eq!(publication.registration_id(), pending.registration_id());
    assert_eq!(publication.original_registration_id(), ready.registration_id);
    assert_eq!(publication.channel(), "aeron:ipc");
    assert_eq!(publication.stream_id(), 1001);
    assert_eq!(publication.session_id(), ready.session_id);
    assert_eq!(
        publication.position_limit_counter_id(),
        ready.position_limit_counter_id
    );
    assert_eq!(
        publication
            .log_buffers()
            .expect("log buffers")
            .term_length(),
        logbuffer::TERM_MIN_LENGTH
    );

    // Later polls hand out the same registration.
    let again = pending.poll().expect("poll").expect("resolved");
    assert_eq!(again.registration_id(), publication.registration_id());

    assert_eq!(client.conductor().pending_command_count(), 0);
    assert_eq!(client.conductor().resource_count(), 1);
}

#[test]
fn test_publication_waits_for_log_file() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_publication("aeron:ipc", 7)
        .expect("add publication");
    let id = pending.registration_id();
    driver.single_command();

    // Ready arrives before the driver has finished writing the log.
    let path = driver.log_path("late");
    let ready = driver.publication_ready(id, id, 7, &path);
    driver.send(&Response::PublicationReady(ready));
    client.invoke().expect("invoke");

    assert!(pending.poll().expect("poll").is_none());
    assert_eq!(pending.state(), CommandState::PendingLogMapping);

    // Waiting on the log is not bounded by the command deadline.
    driver
        .run_for(&client, DRIVER_TIMEOUT * 2)
        .expect("driver alive");
    assert_eq!(pending.state(), CommandState::PendingLogMapping);

    driver.create_log(&path);
    let publication = resolve(&driver, &client, 5, || pending.poll());
    assert_eq!(publication.stream_id(), 7);
    assert_eq!(pending.state(), CommandState::Resolved);
}

#[test]
fn test_driver_error_while_waiting_for_log_file() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_publication("aeron:ipc", 8)
        .expect("add publication");
    let id = pending.registration_id();
    driver.single_command();

    let path = driver.log_path("withdrawn");
    let ready = driver.publication_ready(id, id, 8, &path);
    driver.send(&Response::PublicationReady(ready));
    client.invoke().expect("invoke");
    assert_eq!(pending.state(), CommandState::PendingLogMapping);

    driver.send(&driver_error(ErrorCode::GenericError, "log withdrawn", id));
    client.invoke().expect("invoke");
    assert_eq!(pending.state(), CommandState::Errored);

    driver.create_log(&path);
    driver.run_for(&client, STEP * 5).expect("driver alive");

    assert_eq!(pending.state(), CommandState::Errored);
    assert!(matches!(pending.poll(), Err(Error::DriverError { .. })));
    assert_eq!(client.conductor().resource_count(), 0);
}

#[test]
fn test_publication_with_inconsistent_log_fails() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_publication("aeron:ipc", 8)
        .expect("add publication");
    let id = pending.registration_id();
    driver.single_command();

    // Metadata claims the minimum term length but the file is one page too long.
    let path = driver.log_path("corrupt");
    let length = logbuffer::compute_log_length(logbuffer::TERM_MIN_LENGTH, logbuffer::PAGE_MIN_SIZE)
        + logbuffer::PAGE_MIN_SIZE as usize;
    let mut bytes = vec![0u8; length];
    let metadata = length - LOG_META_DATA_LENGTH;
    bytes[metadata + LOG_TERM_LENGTH_OFFSET..metadata + LOG_TERM_LENGTH_OFFSET + 4]
        .copy_from_slice(&logbuffer::TERM_MIN_LENGTH.to_le_bytes());
    bytes[metadata + LOG_PAGE_SIZE_OFFSET..metadata + LOG_PAGE_SIZE_OFFSET + 4]
        .copy_from_slice(&logbuffer::PAGE_MIN_SIZE.to_le_bytes());
    fs::write(&path, &bytes).expect("write log");

    let ready = driver.publication_ready(id, id, 8, &path);
    driver.send(&Response::PublicationReady(ready));
    client.invoke().expect("invoke");

    assert!(matches!(pending.poll(), Err(Error::ResourceMapping(_))));
    assert_eq!(pending.state(), CommandState::Errored);
    assert!(!client.is_closed());
    assert_eq!(client.conductor().resource_count(), 0);
}

#[test]
fn test_publications_share_mapping_by_original_registration() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let first = client.async_add_publication("aeron:ipc", 9).expect("add");
    let second = client.async_add_publication("aeron:ipc", 9).expect("add");
    assert_eq!(driver.commands().len(), 2);

    let ready = driver.accept_publication(first.registration_id(), 9);
    let mut shared = ready.clone();
    shared.correlation_id = second.registration_id();
    driver.send(&Response::PublicationReady(shared));
    client.invoke().expect("invoke");
    client.invoke().expect("invoke");

    let a = first.poll().expect("poll").expect("first");
    let b = second.poll().expect("poll").expect("second");
    assert_ne!(a.registration_id(), b.registration_id());
    assert_eq!(a.original_registration_id(), b.original_registration_id());
    assert!(Arc::ptr_eq(
        &a.log_buffers().expect("log"),
        &b.log_buffers().expect("log")
    ));
    assert_eq!(client.conductor().log_mapping_count(), 1);

    a.close().expect("close first");
    assert_eq!(client.conductor().log_mapping_count(), 1);
    b.close().expect("close second");
    assert_eq!(client.conductor().log_mapping_count(), 0);
}

#[test]
fn test_publication_driver_error() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_publication("aeron:udp?endpoint=nowhere", 3)
        .expect("add publication");
    driver.single_command();

    driver.send(&driver_error(
        ErrorCode::InvalidChannel,
        "unknown endpoint",
        pending.registration_id(),
    ));
    client.invoke().expect("invoke");

    for _ in 0..2 {
        match pending.poll() {
            Err(Error::DriverError { code, message }) => {
                assert_eq!(code, ErrorCode::InvalidChannel);
                assert_eq!(message, "unknown endpoint");
            }
            other => panic!("expected driver error, got {:?}", other),
        }
    }
    assert_eq!(pending.state(), CommandState::Errored);
    assert_eq!(client.conductor().pending_command_count(), 0);
}

#[test]
fn test_exclusive_publication_resolves() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_exclusive_publication("aeron:ipc", 11)
        .expect("add exclusive publication");
    assert_eq!(pending.kind(), CommandKind::ExclusivePublication);

    match driver.single_command() {
        Command::AddExclusivePublication {
            correlation_id,
            stream_id,
            ..
        } => {
            assert_eq!(correlation_id, pending.registration_id());
            assert_eq!(stream_id, 11);
        }
        other => panic!("unexpected command {:?}", other),
    }

    let path = driver.log_path("exclusive");
    driver.create_log(&path);
    let ready = driver.publication_ready(pending.registration_id(), pending.registration_id(), 11, &path);
    driver.send(&Response::ExclusivePublicationReady(ready.clone()));
    client.invoke().expect("invoke");

    let publication = pending.poll().expect("poll").expect("resolved");
    assert_eq!(publication.session_id(), ready.session_id);
    assert_eq!(
        publication.channel_status_indicator_id(),
        ready.channel_status_indicator_id
    );
}

#[test]
fn test_ready_of_wrong_kind_is_ignored() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_exclusive_publication("aeron:ipc", 12)
        .expect("add exclusive publication");
    driver.single_command();

    // A shared-publication ready does not answer an exclusive add.
    driver.accept_publication(pending.registration_id(), 12);
    client.invoke().expect("invoke");
    assert!(pending.poll().expect("poll").is_none());
    assert_eq!(pending.state(), CommandState::Pending);
}

// ============================================================================
// Subscriptions and counters
// ============================================================================

#[test]
fn test_subscription_resolves() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_subscription("aeron:ipc", 2002)
        .expect("add subscription");
    assert_eq!(pending.kind(), CommandKind::Subscription);

    match driver.single_command() {
        Command::AddSubscription {
            correlation_id,
            stream_id,
            channel,
            ..
        } => {
            assert_eq!(correlation_id, pending.registration_id());
            assert_eq!(stream_id, 2002);
            assert_eq!(channel, "aeron:ipc");
        }
        other => panic!("unexpected command {:?}", other),
    }

    driver.accept_subscription(pending.registration_id());
    client.invoke().expect("invoke");

    let subscription = pending.poll().expect("poll").expect("resolved");
    assert_eq!(subscription.registration_id(), pending.registration_id());
    assert_eq!(subscription.channel(), "aeron:ipc");
    assert_eq!(subscription.stream_id(), 2002);
    assert_eq!(subscription.channel_status_indicator_id(), 5);
    assert_eq!(subscription.image_count(), 0);
    assert!(!subscription.is_connected());
}

#[test]
fn test_subscription_driver_error() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_subscription("aeron:bogus", 1)
        .expect("add subscription");
    driver.single_command();

    driver.send(&driver_error(
        ErrorCode::InvalidChannel,
        "bad media",
        pending.registration_id(),
    ));
    client.invoke().expect("invoke");
    assert!(matches!(
        pending.poll(),
        Err(Error::DriverError {
            code: ErrorCode::InvalidChannel,
            ..
        })
    ));
}

#[test]
fn test_subscription_times_out_without_response() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_subscription("aeron:ipc", 4)
        .expect("add subscription");
    driver.single_command();

    // The driver stays alive but never answers.
    driver
        .run_for(&client, DRIVER_TIMEOUT + STEP * 2)
        .expect("driver alive");

    assert!(matches!(pending.poll(), Err(Error::DriverTimeout { .. })));
    assert_eq!(pending.state(), CommandState::TimedOut);
    assert!(!client.is_closed());

    // A late answer finds nothing to resolve.
    driver.accept_subscription(pending.registration_id());
    client.invoke().expect("invoke");
    assert!(matches!(pending.poll(), Err(Error::DriverTimeout { .. })));
    assert_eq!(client.conductor().resource_count(), 0);
}

#[test]
fn test_counter_resolves_and_updates_value() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client
        .async_add_counter(1001, b"key", "requests")
        .expect("add counter");
    assert_eq!(pending.kind(), CommandKind::Counter);

    match driver.single_command() {
        Command::AddCounter {
            correlation_id,
            type_id,
            key,
            label,
            ..
        } => {
            assert_eq!(correlation_id, pending.registration_id());
            assert_eq!(type_id, 1001);
            assert_eq!(key, b"key".to_vec());
            assert_eq!(label, "requests");
        }
        other => panic!("unexpected command {:?}", other),
    }

    driver.accept_counter(pending.registration_id(), 6);
    client.invoke().expect("invoke");

    let counter = pending.poll().expect("poll").expect("resolved");
    assert_eq!(counter.counter_id(), 6);
    assert_eq!(counter.get().expect("get"), 0);

    counter.set(40).expect("set");
    assert_eq!(counter.add(2).expect("add"), 40);
    assert_eq!(counter.increment().expect("increment"), 42);
    assert_eq!(driver.cnc.counter_value(6).expect("value"), 43);
}

#[test]
fn test_counter_driver_error_and_timeout() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let rejected = client.async_add_counter(1, &[], "a").expect("add counter");
    let ignored = client.async_add_counter(1, &[], "b").expect("add counter");
    assert_eq!(driver.commands().len(), 2);

    driver.send(&driver_error(
        ErrorCode::StorageSpace,
        "no counters left",
        rejected.registration_id(),
    ));
    driver
        .run_for(&client, DRIVER_TIMEOUT + STEP * 2)
        .expect("driver alive");

    assert!(matches!(
        rejected.poll(),
        Err(Error::DriverError {
            code: ErrorCode::StorageSpace,
            ..
        })
    ));
    assert!(matches!(ignored.poll(), Err(Error::DriverTimeout { .. })));
}

// ============================================================================
// Unknown, duplicate and late responses
// ============================================================================

#[test]
fn test_unknown_correlation_ids_are_ignored() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client.async_add_counter(2, &[], "live").expect("add counter");
    driver.single_command();

    driver.accept_counter(987_654, 1);
    driver.accept_subscription(987_655);
    driver.send(&driver_error(ErrorCode::GenericError, "stray", 987_656));
    let path = driver.log_path("stray");
    let stray = driver.publication_ready(987_657, 987_657, 1, &path);
    driver.send(&Response::PublicationReady(stray));
    driver.send(&Response::OperationSuccess {
        correlation_id: 987_658,
    });
    driver.send(&Response::UnavailableCounter {
        registration_id: 987_659,
        counter_id: 2,
    });

    client.invoke().expect("invoke");
    assert_eq!(client.conductor().resource_count(), 0);
    assert_eq!(client.conductor().pending_command_count(), 1);
    assert!(pending.poll().expect("poll").is_none());
}

#[test]
fn test_duplicate_ready_is_ignored() {
    let mut driver = MockDriver::new();
    let client = driver.connect();

    let pending = client.async_add_counter(3, &[], "dup").expect("add counter");
    driver.single_command();

    driver.accept_counter(pending.registration_id(), 7);
    driver.accept_counter(pending.registration_id(), 8);
    driver.send(&driver_error(
        ErrorCode::GenericError,
        "late",
        pending.registration_id(),
    ));
    client.invoke().expect("invoke");

    let counter = pending.poll().expect("poll").expect("resolved");
    assert_eq!(counter.counter_id(), 7);
    assert_eq!(client.conductor().resource_count(), 1);
}

// ============================================================================
// Submission failures and concurrency
// ============================================================================

#[test]
fn test_full_command_channel_leaves_no_entry() {
    let driver = MockDriver::with_ring_capacity(1024);
    let client = driver.connect();

    let mut accepted = Vec::new();
    let mut full = false;
    for stream_id in 0..200 {
        match client.async_add_publication("aeron:ipc?term-length=65536", stream_id) {
            Ok(pending) => accepted.push(pending),
            Err(Error::ChannelFull) => {
                full = true;
                break;
            }
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }
    assert!(full, "ring buffer never filled");
    assert!(!accepted.is_empty());
    assert_eq!(
        client.conductor().pending_command_count(),
        accepted.len()
    );

    // Once the driver catches up the client can submit again.
    assert_eq!(driver.commands().len(), accepted.len());
    let retry = client
        .async_add_publication("aeron:ipc?term-length=65536", 999)
        .expect("add after drain");
    assert_eq!(
        client.conductor().pending_command_count(),
        accepted.len() + 1
    );
    assert!(retry.poll().expect("poll").is_none());
}

#[test]
fn test_concurrent_adds_get_unique_ids() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;

    let mut driver = MockDriver::new();
    let client = driver.connect_with(driver.context().response_drain_limit(THREADS * PER_THREAD));

    let pendings: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let client = &client;
                scope.spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| {
                            let type_id = fastrand::i32(1..10_000);
                            let key = [fastrand::u8(..); 4];
                            client
                                .async_add_counter(type_id, &key, &format!("t{t}-{i}"))
                                .expect("add counter")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect()
    });

    let ids: HashSet<i64> = pendings.iter().map(|p| p.registration_id()).collect();
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert!(!ids.contains(&client.client_id()));

    let commands = driver.commands();
    assert_eq!(commands.len(), THREADS * PER_THREAD);
    for (slot, command) in commands.iter().enumerate() {
        assert!(ids.contains(&command.correlation_id()));
        driver.accept_counter(command.correlation_id(), (slot % 64) as i32);
    }

    client.invoke().expect("invoke");
    for pending in &pendings {
        assert!(pending.poll().expect("poll").is_some());
    }
    assert_eq!(client.conductor().resource_count(), THREADS * PER_THREAD);
    assert_eq!(client.conductor().pending_command_count(), 0);
}
