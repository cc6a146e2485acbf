//! Throughput benchmarks for Knox.
//!
//! These benchmarks measure membership churn and room fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use knox_bench::{drain, populated_hub, populated_room};
use knox_core::{ConnectionId, RoomRegistry};
use knox_protocol::{ChatEntry, ServerEvent};

fn chat_event() -> ServerEvent {
    ServerEvent::ChatMessage(ChatEntry {
        nickname: "alice".into(),
        message: "x".repeat(64),
        timestamp: "2024-01-01T10:02:00Z".into(),
    })
}

/// Benchmark registry membership operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("join_new_room", |b| {
        let registry = RoomRegistry::new();
        let conn = ConnectionId::new("conn-1");
        let mut i = 0u64;
        b.iter(|| {
            let room = format!("room-{}", i % 1000);
            i += 1;
            let _ = registry.add_member(black_box(&room), &conn);
        });
    });

    // Join then leave, so the room is created and deleted every iteration
    group.bench_function("join_leave_churn", |b| {
        let registry = RoomRegistry::new();
        let conn = ConnectionId::new("conn-1");
        b.iter(|| {
            registry.add_member(black_box("lobby"), &conn).unwrap();
            registry.remove_member(black_box("lobby"), &conn)
        });
    });

    group.bench_function("members_of_1000", |b| {
        let (registry, _engine, _inboxes) = populated_room("lobby", 1000, 1);
        b.iter(|| registry.members_of(black_box("lobby")));
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (_registry, engine, mut inboxes) = populated_room("lobby", size, 1024);
            let event = chat_event();

            b.iter(|| {
                let report = engine.send_to_room("lobby", black_box(event.clone()));
                drain(&mut inboxes);
                report
            });
        });
    }

    group.finish();
}

/// Benchmark the full message path: store append plus fan-out.
fn bench_hub_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_message");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, mut members) = rt.block_on(populated_hub("lobby", size, 1024));
            let sender = members[0].0.clone();

            b.iter(|| {
                rt.block_on(hub.on_message(
                    &sender,
                    "lobby",
                    black_box("hello".to_string()),
                    "T".to_string(),
                ))
                .unwrap();
                for (_, inbox) in &mut members {
                    while inbox.try_recv().is_ok() {}
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout, bench_hub_message);
criterion_main!(benches);
