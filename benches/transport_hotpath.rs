//! Per-packet processing latency benchmarks for sliq.
//!
//! Measures latency contributions of the hot-path components:
//! - VarInt encode/decode
//! - DataHeader / AckHeader encode/decode
//! - GF(256) field arithmetic
//! - Vandermonde/Cauchy FEC repair generation and group decode
//! - `SentPacketManager::on_send` (the send-side bookkeeping path)
//!
//! Run with: cargo bench --package sliq

use bytes::{Buf, Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use sliq::gf256;
use sliq::sent::SentPacketManager;
use sliq::types::Reliability;
use sliq::vdm_fec::{generate_repair, FecGroupDecoder};
use sliq::wire::{AckBlock, AckHeader, DataFlags, DataHeader, VarInt};

// ─── VarInt ──────────────────────────────────────────────────────────────

fn bench_varint_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint_encode");

    for (name, val) in [
        ("1byte", 42u32),
        ("2byte", 1000),
        ("4byte", 100_000),
    ] {
        let vi = VarInt::from(val);
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(8);
                black_box(vi).encode(&mut buf);
                black_box(buf);
            });
        });
    }

    group.finish();
}

fn bench_varint_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint_decode");

    for (name, val) in [
        ("1byte", 42u32),
        ("2byte", 1000),
        ("4byte", 100_000),
    ] {
        let vi = VarInt::from(val);
        let mut buf = BytesMut::with_capacity(8);
        vi.encode(&mut buf);
        let encoded = buf.freeze();

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut r = encoded.clone();
                black_box(VarInt::decode(&mut r).unwrap());
            });
        });
    }

    group.finish();
}

// ─── DataHeader ──────────────────────────────────────────────────────────

fn sample_data_header(payload_len: usize) -> DataHeader {
    DataHeader {
        flags: DataFlags::empty(),
        cc_id: 0,
        stream_id: 1,
        retransmit_count: 0,
        payload_length: payload_len as u16,
        seq_num: 42,
        timestamp: 1_000_000,
        timestamp_delta: 0,
        move_forward_seq: None,
        fec: None,
        ttg: vec![],
    }
}

fn bench_data_header_encode(c: &mut Criterion) {
    let hdr = sample_data_header(1200);
    c.bench_function("data_header_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(32);
            black_box(&hdr).encode(&mut buf);
            black_box(buf);
        });
    });
}

fn bench_data_header_decode(c: &mut Criterion) {
    let hdr = sample_data_header(1200);
    let mut buf = BytesMut::with_capacity(32);
    hdr.encode(&mut buf);
    let mut encoded = buf.freeze();
    encoded.advance(1); // decode() expects the type byte already consumed

    c.bench_function("data_header_decode", |b| {
        b.iter(|| {
            let mut r = encoded.clone();
            black_box(DataHeader::decode(&mut r).unwrap());
        });
    });
}

// ─── Full Data frame (header + payload) ─────────────────────────────────

fn bench_data_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frame_encode");

    for size in [100, 500, 1200, 4000] {
        let hdr = sample_data_header(size);
        let payload = Bytes::from(vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(hdr.encoded_len() + size);
                black_box(&hdr).encode(&mut buf);
                buf.extend_from_slice(black_box(&payload));
                black_box(buf.freeze());
            });
        });
    }

    group.finish();
}

// ─── AckHeader ───────────────────────────────────────────────────────────

fn sample_ack_header(num_blocks: usize) -> AckHeader {
    AckHeader {
        next_expected: 1000,
        largest_observed: 1000 + num_blocks as u32 * 4,
        observed_timestamp: 1_000_000,
        ack_blocks: (0..num_blocks).map(|_| AckBlock { gap: 1, length: 3 }).collect(),
        observed_times: vec![],
        received_history: vec![],
    }
}

fn bench_ack_header_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack_header_encode");
    for blocks in [0usize, 4, 16] {
        let hdr = sample_ack_header(blocks);
        group.bench_function(format!("{blocks}_blocks"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(64);
                black_box(&hdr).encode(&mut buf);
                black_box(buf);
            });
        });
    }
    group.finish();
}

fn bench_ack_header_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack_header_decode");
    for blocks in [0usize, 4, 16] {
        let hdr = sample_ack_header(blocks);
        let mut buf = BytesMut::with_capacity(64);
        hdr.encode(&mut buf);
        let mut encoded = buf.freeze();
        encoded.advance(1);
        group.bench_function(format!("{blocks}_blocks"), |b| {
            b.iter(|| {
                let mut r = encoded.clone();
                black_box(AckHeader::decode(&mut r).unwrap());
            });
        });
    }
    group.finish();
}

// ─── GF(256) field arithmetic ────────────────────────────────────────────

fn bench_gf256_mul(c: &mut Criterion) {
    c.bench_function("gf256_mul", |b| {
        b.iter(|| {
            for a in 1u8..=255 {
                black_box(gf256::mul(black_box(a), black_box(137)));
            }
        });
    });
}

fn bench_gf256_inv(c: &mut Criterion) {
    c.bench_function("gf256_inv", |b| {
        b.iter(|| {
            for a in 1u8..=255 {
                black_box(gf256::inv(black_box(a)));
            }
        });
    });
}

// ─── Vandermonde/Cauchy FEC ──────────────────────────────────────────────

fn bench_fec_generate_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_generate_repair");
    for (k, r) in [(4, 1), (8, 2), (10, 4)] {
        let sources: Vec<Vec<u8>> = (0..k).map(|i| vec![i as u8; 1200]).collect();
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        group.throughput(Throughput::Bytes(1200 * k as u64));
        group.bench_function(format!("k{k}_r{r}"), |b| {
            b.iter(|| {
                black_box(generate_repair(black_box(&refs), r).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_fec_group_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fec_group_decode");
    for k in [4usize, 8, 10] {
        let sources: Vec<Vec<u8>> = (0..k).map(|i| vec![i as u8; 1200]).collect();
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let repair = generate_repair(&refs, 1).unwrap();

        group.bench_function(format!("k{k}_one_loss"), |b| {
            b.iter(|| {
                let mut dec = FecGroupDecoder::new(k, 1200);
                for (i, s) in sources.iter().enumerate().skip(1) {
                    dec.insert(i, s.clone());
                }
                dec.insert(k, repair[0].clone());
                black_box(dec.try_decode().unwrap().unwrap());
            });
        });
    }
    group.finish();
}

// ─── SentPacketManager send path ─────────────────────────────────────────

fn bench_sent_manager_on_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("sent_manager_on_send");

    group.bench_function("reliable_arq_window_of_256", |b| {
        let now = quanta::Instant::now();
        b.iter(|| {
            let mut spm = SentPacketManager::new(256, 1);
            for _ in 0..256 {
                black_box(spm.on_send(1, Reliability::reliable_arq(), Bytes::from(vec![0xABu8; 1200]), now));
            }
        });
    });

    group.bench_function("semi_reliable_arq_fec_window_of_256", |b| {
        let reliability = Reliability::semi_reliable_arq_fec_rounds(3, 0.95, 4, 8);
        let now = quanta::Instant::now();
        b.iter(|| {
            let mut spm = SentPacketManager::new(256, 1);
            for _ in 0..256 {
                let (_, fec) = spm.on_send(1, reliability, Bytes::from(vec![0xABu8; 1200]), now);
                black_box(fec);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_varint_encode,
    bench_varint_decode,
    bench_data_header_encode,
    bench_data_header_decode,
    bench_data_frame_encode,
    bench_ack_header_encode,
    bench_ack_header_decode,
    bench_gf256_mul,
    bench_gf256_inv,
    bench_fec_generate_repair,
    bench_fec_group_decode,
    bench_sent_manager_on_send,
);
criterion_main!(benches);
