//! Codec benchmarks for knox-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use knox_protocol::{codec, ChatEntry, ServerEvent, WireFormat};

fn chat_event(len: usize) -> ServerEvent {
    ServerEvent::ChatMessage(ChatEntry {
        nickname: "alice".to_string(),
        message: "x".repeat(len),
        timestamp: "10:02".to_string(),
    })
}

fn bench_encode(c: &mut Criterion) {
    let event = chat_event(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("json_64B", |b| {
        b.iter(|| WireFormat::Json.encode(black_box(&event)))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| WireFormat::MessagePack.encode(black_box(&event)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let event = chat_event(64);
    let encoded = codec::encode(&event).unwrap();
    let text = codec::encode_json(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode::<ServerEvent>(black_box(&encoded)))
    });
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode_json::<ServerEvent>(black_box(&text)))
    });
    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let history = ServerEvent::LoadHistory(
        (0..50)
            .map(|i| ChatEntry {
                nickname: format!("user-{}", i % 5),
                message: "x".repeat(128),
                timestamp: "10:02".to_string(),
            })
            .collect(),
    );

    c.bench_function("history_50_json", |b| {
        b.iter(|| WireFormat::Json.encode(black_box(&history)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_history);
criterion_main!(benches);
