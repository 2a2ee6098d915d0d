//! End-to-end connection latency benchmarks: enqueue, send, and deliver a
//! payload through a pair of in-memory [`Connection`]s, mirroring the
//! construct-two-endpoints style `tests/integration.rs` uses but measuring
//! throughput instead of asserting correctness.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quanta::Instant;

use sliq::connection::Connection;
use sliq::types::{CongCtrl, DeliveryMode, DequeueRule, DropRule, Reliability};

fn connected_pair() -> (Connection, Connection) {
    let offered = vec![CongCtrl::fixed_rate(10_000_000_000)];
    let mut client = Connection::new(1, true, offered.clone());
    let mut server = Connection::new(2, false, offered);
    let now = Instant::now();
    let hello = client.initiate(0);
    let replies = server.on_frame(hello, now, 0).unwrap();
    for reply in replies {
        client.on_frame(reply, now, 0).unwrap();
    }
    (client, server)
}

/// Benchmark the sender hot path: enqueue + drain via `poll_send`.
fn bench_connection_send(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xABu8; 1200]);

    let mut group = c.benchmark_group("connection_send");
    group.throughput(Throughput::Elements(1));

    group.bench_function("send_single_packet", |b| {
        b.iter(|| {
            let (mut client, mut server) = connected_pair();
            let now = Instant::now();
            client
                .create_stream(1, 0, Reliability::best_effort(), DeliveryMode::Unordered, 0)
                .map(|f| server.on_frame(f, now, 0).unwrap())
                .unwrap();
            client.stream_mut(1).unwrap().enqueue(black_box(payload.clone())).unwrap();
            while let Some(frame) = client.poll_send(1, now, 0) {
                black_box(frame);
            }
        });
    });

    group.bench_function("send_100_packets", |b| {
        b.iter(|| {
            let (mut client, mut server) = connected_pair();
            let now = Instant::now();
            client
                .create_stream(1, 0, Reliability::best_effort(), DeliveryMode::Unordered, 0)
                .map(|f| server.on_frame(f, now, 0).unwrap())
                .unwrap();
            client.stream_mut(1).unwrap().configure_tx_queue(128, DequeueRule::Fifo, DropRule::NoDrop);
            for _ in 0..100 {
                client.stream_mut(1).unwrap().enqueue(black_box(payload.clone())).unwrap();
            }
            while let Some(frame) = client.poll_send(1, now, 0) {
                black_box(frame);
            }
        });
    });

    group.finish();
}

/// Benchmark the receiver hot path: feeding pre-built `Data` frames into
/// `on_frame` and draining delivered payloads.
fn bench_connection_receive(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xABu8; 1200]);
    let now = Instant::now();

    let (mut client, mut server) = connected_pair();
    client
        .create_stream(1, 0, Reliability::best_effort(), DeliveryMode::Unordered, 0)
        .map(|f| server.on_frame(f, now, 0).unwrap())
        .unwrap();
    client.stream_mut(1).unwrap().configure_tx_queue(256, DequeueRule::Fifo, DropRule::NoDrop);
    for _ in 0..200 {
        client.stream_mut(1).unwrap().enqueue(payload.clone()).unwrap();
    }
    let mut frames = Vec::new();
    while let Some(frame) = client.poll_send(1, now, 0) {
        frames.push(frame);
    }

    let mut group = c.benchmark_group("connection_receive");
    group.throughput(Throughput::Elements(1));

    group.bench_function("receive_single_packet", |b| {
        let mut idx = 0;
        b.iter(|| {
            let frame = frames[idx % frames.len()].clone();
            server.on_frame(black_box(frame), now, 0).unwrap();
            for payload in server.stream_mut(1).unwrap().take_received() {
                black_box(payload);
            }
            idx += 1;
        });
    });

    group.finish();
}

/// Benchmark a full send -> receive -> ack round trip over a reliable,
/// ordered stream (the path every congestion-controlled byte takes).
fn bench_send_receive_roundtrip(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xABu8; 1200]);

    let mut group = c.benchmark_group("roundtrip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reliable_ordered_round_trip", |b| {
        b.iter(|| {
            let (mut client, mut server) = connected_pair();
            let now = Instant::now();
            client
                .create_stream(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
                .map(|f| server.on_frame(f, now, 0).unwrap())
                .unwrap();
            client.stream_mut(1).unwrap().enqueue(black_box(payload.clone())).unwrap();
            while let Some(frame) = client.poll_send(1, now, 0) {
                server.on_frame(frame, now, 0).unwrap();
            }
            if let Some(ack) = server.build_ack(1, 0) {
                client.on_frame(ack, now, 0).unwrap();
            }
            for payload in server.stream_mut(1).unwrap().take_received() {
                black_box(payload);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_connection_send,
    bench_connection_receive,
    bench_send_receive_roundtrip
);
criterion_main!(benches);
