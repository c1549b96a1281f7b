//! Benchmarks for the packet codec and stream parser.
//!
//! A full character-file upload at 57600 baud is roughly 1600 bytes split
//! into 128-byte data packets; parsing must stay far below the line rate.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

use optiscan_core::constants::DEFAULT_ADDRESS;
use optiscan_protocol::{Command, Packet, SensorCodec, StreamParser, parse_one};

fn search_command() -> Packet {
    Command::Search {
        buffer: 1,
        start_page: 0,
        page_count: 200,
    }
    .to_packet(DEFAULT_ADDRESS)
}

/// Acknowledgment followed by `chunks` data packets of `chunk_size` bytes.
fn upload_stream(chunks: usize, chunk_size: usize) -> BytesMut {
    let mut codec = SensorCodec::new();
    let mut wire = BytesMut::new();

    codec
        .encode(Packet::acknowledge(DEFAULT_ADDRESS, 0x00, &[]), &mut wire)
        .unwrap();
    for i in 0..chunks {
        let payload = vec![i as u8; chunk_size];
        let packet = Packet::data(DEFAULT_ADDRESS, &payload, i + 1 == chunks).unwrap();
        codec.encode(packet, &mut wire).unwrap();
    }
    wire
}

fn bench_encode_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_command");
    group.throughput(Throughput::Elements(1));

    let packet = search_command();

    group.bench_function("serialize_search", |b| {
        b.iter(|| black_box(black_box(&packet).serialize().unwrap()));
    });

    group.bench_function("build_and_encode_search", |b| {
        b.iter(|| {
            let mut codec = SensorCodec::new();
            let mut buffer = BytesMut::new();
            codec.encode(black_box(search_command()), &mut buffer).unwrap();
            black_box(buffer);
        });
    });

    group.finish();
}

fn bench_parse_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_one");

    for size in [0usize, 32, 128, 256] {
        let wire = if size == 0 {
            Packet::acknowledge(DEFAULT_ADDRESS, 0x00, &[]).serialize().unwrap()
        } else {
            Packet::data(DEFAULT_ADDRESS, &vec![0x5A; size], false)
                .unwrap()
                .serialize()
                .unwrap()
        };
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| black_box(parse_one(black_box(wire)).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_upload");

    for chunk_size in [32usize, 64, 128, 256] {
        let chunks = 1536 / chunk_size;
        let stream = upload_stream(chunks, chunk_size).freeze();
        group.throughput(Throughput::Bytes(stream.len() as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &stream,
            |b, stream| {
                b.iter(|| {
                    let mut codec = SensorCodec::new();
                    let mut buffer = BytesMut::from(&stream[..]);
                    let mut count = 0;

                    while let Ok(Some(_)) = codec.decode(&mut buffer) {
                        count += 1;
                    }

                    black_box(count);
                });
            },
        );
    }

    group.finish();
}

/// Simulates a UART delivering the stream in small reads.
fn bench_partial_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_reads");
    group.throughput(Throughput::Elements(1));

    let stream = upload_stream(12, 128).freeze();

    for read_size in [8usize, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("read_{read_size}_bytes")),
            &read_size,
            |b, &size| {
                b.iter(|| {
                    let mut parser = StreamParser::new();
                    for chunk in stream.chunks(size) {
                        parser.feed(chunk);
                    }
                    black_box(parser.drain_packets().count());
                });
            },
        );
    }

    group.finish();
}

fn bench_noisy_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("noisy_stream");
    group.throughput(Throughput::Elements(1));

    let mut noisy = upload_stream(4, 128);
    noisy.extend_from_slice(&[0x55; 64]);
    noisy.extend_from_slice(&upload_stream(4, 128));
    let noisy = noisy.freeze();

    group.bench_function("resync_after_noise", |b| {
        b.iter(|| {
            let mut parser = StreamParser::new();
            parser.feed(black_box(&noisy));
            black_box(parser.drain_packets().count());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_command,
    bench_parse_one,
    bench_decode_upload,
    bench_partial_reads,
    bench_noisy_stream,
);

criterion_main!(benches);
