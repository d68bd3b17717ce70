//! Broadcast benchmarks for Relay.
//!
//! These benchmarks measure fan-out cost over in-memory connections, so
//! only the broadcaster and registry are on the clock.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tenvis_relay_core::{Broadcaster, ChannelId, ChannelRegistry};
use tenvis_relay_transport::memory;
use tenvis_relay_transport::{Connection, ConnectionId};
use tokio::runtime::Runtime;

struct Fixture {
    broadcaster: Broadcaster,
    channel: ChannelId,
    sender: ConnectionId,
}

/// A channel of `members` connections whose clients drain on `rt`.
fn fixture(rt: &Runtime, members: usize) -> Fixture {
    let registry = Arc::new(ChannelRegistry::new());
    let (channel, _) = registry.create_channel().unwrap();

    let mut sender = None;
    for _ in 0..members {
        let (conn, mut client) = memory::pair();
        sender.get_or_insert_with(|| conn.id().clone());
        registry.add_member(channel, Arc::new(conn)).unwrap();
        rt.spawn(async move { while client.recv().await.is_some() {} });
    }

    Fixture {
        broadcaster: Broadcaster::new(registry),
        channel,
        sender: sender.unwrap(),
    }
}

/// Benchmark fan-out by channel size.
fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");

    for members in [2usize, 10, 100, 1000] {
        let fx = fixture(&rt, members);
        group.throughput(Throughput::Elements((members - 1) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.to_async(&rt).iter(|| {
                fx.broadcaster
                    .broadcast(fx.channel, &fx.sender, "hello everyone")
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out by message size.
fn bench_payload_size(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("payload_size");

    for size in [64usize, 1024, 65536] {
        let fx = fixture(&rt, 10);
        let payload = "x".repeat(size);
        group.throughput(Throughput::Bytes((size * 9) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt)
                .iter(|| fx.broadcaster.broadcast(fx.channel, &fx.sender, payload));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_payload_size);
criterion_main!(benches);
