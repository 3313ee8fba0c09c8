//! Benchmarks for the payload pipeline: base64, raw deflate, JSON, key remap

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use signalr_feed::feed::decode::{decode_payload, remap_keys};
use std::io::Write;

fn exchange_delta(levels: usize) -> Value {
    let side = |offset: f64| -> Vec<Value> {
        (0..levels)
            .map(|i| json!({"TY": 0, "R": offset + i as f64 * 0.0001, "Q": 1.25 + i as f64}))
            .collect()
    };
    json!({
        "M": "BTC-ETH",
        "N": 123_456,
        "Z": side(0.07),
        "S": side(0.08),
        "f": [{"FI": 1, "OT": "BUY", "R": 0.0701, "Q": 0.5, "T": 1_700_000_000_000u64}],
    })
}

fn encode(value: &Value) -> String {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(value.to_string().as_bytes())
        .expect("deflate");
    STANDARD.encode(encoder.finish().expect("deflate"))
}

fn bench_decode_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_payload");
    for levels in [5, 50] {
        let encoded = encode(&exchange_delta(levels));
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(format!("exchange_delta_{levels}"), |b| {
            b.iter(|| {
                let result = decode_payload(black_box(&encoded));
                black_box(result)
            })
        });
    }
    group.finish();
}

fn bench_remap_keys(c: &mut Criterion) {
    let terse = exchange_delta(50);
    c.bench_function("remap_keys_50_levels", |b| {
        b.iter(|| black_box(remap_keys(black_box(terse.clone()))))
    });
}

criterion_group!(benches, bench_decode_payload, bench_remap_keys);
criterion_main!(benches);
