// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command Channel Benchmark
//!
//! Measures the cost of the two shared-memory hops of every async add:
//! - client -> driver: encode a command and write it to the ring buffer
//! - driver -> client: broadcast a response, copy it out and decode it

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether::concurrent::{
    broadcast, ring_buffer, AlignedBuffer, BroadcastReceiver, BroadcastTransmitter,
    CopyBroadcastReceiver, ManyToOneRingBuffer,
};
use tether::driver_proxy::DriverProxy;
use tether::protocol::{PublicationReady, Response};

const CAPACITY: usize = 64 * 1024;

fn bench_command_write(c: &mut Criterion) {
    let region = AlignedBuffer::new(CAPACITY + ring_buffer::TRAILER_LENGTH);
    let proxy = DriverProxy::new(ManyToOneRingBuffer::new(region.atomic_buffer()).expect("ring"));
    let consumer = ManyToOneRingBuffer::new(region.atomic_buffer()).expect("ring");

    let mut group = c.benchmark_group("command_write");
    for channel in ["aeron:ipc", "aeron:udp?endpoint=localhost:40123|mtu=1408|term-length=65536"] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(channel.len()), channel, |b, channel| {
            b.iter(|| {
                let id = proxy.next_correlation_id();
                if proxy.add_publication(id, channel, 1001).is_err() {
                    consumer.read(|_, payload| { black_box(payload); }, usize::MAX);
                }
            });
        });
    }
    group.finish();
}

fn bench_response_roundtrip(c: &mut Criterion) {
    let region = AlignedBuffer::new(CAPACITY + broadcast::TRAILER_LENGTH);
    let mut transmitter = BroadcastTransmitter::new(region.atomic_buffer()).expect("transmitter");
    let mut receiver = CopyBroadcastReceiver::new(
        BroadcastReceiver::new(region.atomic_buffer()).expect("receiver"),
    );

    let response = Response::PublicationReady(PublicationReady {
        correlation_id: 42,
        registration_id: 42,
        session_id: 7,
        stream_id: 1001,
        position_limit_counter_id: 3,
        channel_status_indicator_id: 4,
        log_file: "/dev/shm/tether-bench/publications/42.logbuffer".to_string(),
    });
    let encoded = response.encode();

    c.bench_function("response_transmit_decode", |b| {
        b.iter(|| {
            transmitter
                .transmit(response.type_id(), &encoded)
                .expect("transmit");
            let mut decoded = None;
            receiver
                .receive(|type_id, payload| decoded = Response::decode(type_id, payload))
                .expect("receive");
            black_box(decoded)
        });
    });
}

criterion_group!(benches, bench_command_write, bench_response_roundtrip);
criterion_main!(benches);
