//! JSON vs. binary codec throughput, adapted from the teacher's
//! `serialization` bench.

use criterion::{criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};
use tiercache_bus::codecs::{BinaryCodec, Codec, JsonCodec};

#[derive(Serialize, Deserialize, Clone)]
struct Payload {
    id: u64,
    name: String,
    tags: Vec<String>,
}

fn sample() -> Payload {
    Payload {
        id: 1,
        name: "sample payload".to_string(),
        tags: vec!["a".into(), "b".into(), "c".into()],
    }
}

fn bench_codecs(c: &mut Criterion) {
    let json = JsonCodec;
    let binary = BinaryCodec;
    let payload = sample();
    let json_bytes = json.encode(&payload).unwrap();
    let binary_bytes = binary.encode(&payload).unwrap();

    c.bench_function("json_encode", |b| b.iter(|| json.encode(&payload).unwrap()));
    c.bench_function("json_decode", |b| b.iter(|| json.decode::<Payload>(&json_bytes).unwrap()));
    c.bench_function("binary_encode", |b| b.iter(|| binary.encode(&payload).unwrap()));
    c.bench_function("binary_decode", |b| {
        b.iter(|| binary.decode::<Payload>(&binary_bytes).unwrap())
    });
}

criterion_group!(benches, bench_codecs);
criterion_main!(benches);
