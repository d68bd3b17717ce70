//! Registry benchmarks for Relay.
//!
//! These benchmarks measure the cost of the operations every session performs
//! under the registry lock.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_protocol::InviteKey;
use std::sync::Arc;
use tenvis_relay_core::{ChannelRegistry, KeyGenerator, RandomKeyGenerator, RegistryConfig};
use tenvis_relay_transport::{memory, Connection};

/// Benchmark invite key generation.
fn bench_keygen(c: &mut Criterion) {
    let keygen = RandomKeyGenerator;
    c.bench_function("keygen", |b| b.iter(|| black_box(keygen.generate())));
}

/// Benchmark a full create, join, leave cycle.
fn bench_channel_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_lifecycle");

    group.bench_function("create_and_delete", |b| {
        let registry = ChannelRegistry::new();
        b.iter(|| {
            let (conn, _client) = memory::pair();
            let conn: Arc<dyn Connection> = Arc::new(conn);
            let (channel, _key) = registry.create_channel().unwrap();
            registry.add_member(channel, conn.clone()).unwrap();
            registry.remove_member(channel, conn.id())
        });
    });

    group.bench_function("create_with_10k_live", |b| {
        let registry = ChannelRegistry::with_config(RegistryConfig {
            max_channels: usize::MAX,
            ..Default::default()
        });
        let mut held = Vec::new();
        for _ in 0..10_000 {
            let (conn, client) = memory::pair();
            let conn: Arc<dyn Connection> = Arc::new(conn);
            let (channel, _) = registry.create_channel().unwrap();
            registry.add_member(channel, conn).unwrap();
            held.push(client);
        }

        b.iter(|| {
            let (channel, _key) = registry.create_channel().unwrap();
            registry.discard_if_empty(channel)
        });
    });

    group.finish();
}

/// Benchmark key lookups against a populated registry.
fn bench_join_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_lookup");

    // Setup: 1000 channels with 10 members each
    let registry = ChannelRegistry::new();
    let mut keys: Vec<InviteKey> = Vec::new();
    let mut clients = Vec::new();
    for _ in 0..1000 {
        let (channel, key) = registry.create_channel().unwrap();
        for _ in 0..10 {
            let (conn, client) = memory::pair();
            registry.add_member(channel, Arc::new(conn)).unwrap();
            clients.push(client);
        }
        keys.push(key);
    }

    group.bench_function("hit", |b| {
        let mut i = 0;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            registry.join(black_box(key))
        });
    });

    let missing = InviteKey::parse("ZZZZZZ").unwrap();
    group.bench_function("miss", |b| b.iter(|| registry.join(black_box(&missing))));

    group.bench_function("members_snapshot", |b| {
        let channel = registry.join(&keys[0]).unwrap();
        b.iter(|| registry.members(black_box(channel)))
    });

    group.finish();
}

criterion_group!(benches, bench_keygen, bench_channel_lifecycle, bench_join_lookup);
criterion_main!(benches);
