//! Throughput of frame decode + event dispatch (spec §4.1/§4.2), the hot
//! path the poll timeout and slab allocator are sized against.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tracesrv::dispatch::{parse_events, EventType};
use tracesrv::model::Trace;
use tracesrv::wire::StreamDecoder;

fn encode_zone_pair(buf: &mut Vec<u8>, srcloc: u64, begin: i64, end: i64) {
    buf.push(EventType::ZoneBegin as u8);
    buf.extend_from_slice(&srcloc.to_le_bytes());
    buf.extend_from_slice(&begin.to_le_bytes());
    buf.push(EventType::ZoneEnd as u8);
    buf.extend_from_slice(&end.to_le_bytes());
}

fn bench_dispatch(c: &mut Criterion) {
    let mut wire = Vec::new();
    for i in 0..10_000i64 {
        encode_zone_pair(&mut wire, 1, i * 10, i * 10 + 5);
    }

    c.bench_function("parse_events_10k_zone_pairs", |b| {
        b.iter(|| {
            let (events, consumed) = parse_events(black_box(&wire)).unwrap();
            assert_eq!(consumed, wire.len());
            black_box(events.len())
        })
    });

    c.bench_function("ingest_10k_zone_pairs", |b| {
        b.iter(|| {
            let mut trace = Trace::new();
            let (events, _) = parse_events(black_box(&wire)).unwrap();
            for event in events {
                trace.ingest(event).unwrap();
            }
            black_box(trace.zones_cnt)
        })
    });
}

fn bench_lz4_roundtrip(c: &mut Criterion) {
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(200);
    let compressed = lz4_flex::block::compress(&payload);

    let mut wire = Vec::new();
    wire.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
    wire.extend_from_slice(&compressed);

    c.bench_function("stream_decoder_lz4_frame", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new(true, payload.len() + 4096);
            let mut cursor = std::io::Cursor::new(wire.clone());
            decoder.poll(&mut cursor).unwrap();
            black_box(decoder.available().len())
        })
    });
}

criterion_group!(benches, bench_dispatch, bench_lz4_roundtrip);
criterion_main!(benches);
