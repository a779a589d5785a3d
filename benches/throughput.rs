//! Throughput Benchmark for wsrelay
//!
//! This benchmark measures the registry and the router under various
//! workloads, without sockets in the way.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use wsrelay::connection::{Connection, ConnectionId, OutboundQueue};
use wsrelay::protocol::{Message, Payload};
use wsrelay::registry::ConnectionRegistry;
use wsrelay::router::{Router, RoutingPolicy};

fn addr() -> SocketAddr {
    "127.0.0.1:40100".parse().unwrap()
}

fn open_connection(id: u64, capacity: usize) -> (Arc<Connection>, OutboundQueue) {
    let (conn, rx) = Connection::new(ConnectionId::new(id), addr(), capacity);
    conn.mark_open();
    (conn, rx)
}

/// Spawns a task that empties `rx` forever, standing in for a writer.
fn drain(runtime: &Runtime, mut rx: OutboundQueue) {
    runtime.spawn(async move { while rx.recv().await.is_some() {} });
}

/// Benchmark registry operations
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("register_deregister", |b| {
        let registry = ConnectionRegistry::new();
        let mut i = 0u64;
        b.iter(|| {
            let (conn, _rx) = open_connection(i, 1);
            registry.register(Arc::clone(&conn)).unwrap();
            black_box(registry.deregister(conn.id()));
            i += 1;
        });
    });

    for size in [10u64, 100, 1_000] {
        let registry = ConnectionRegistry::new();
        let mut queues = Vec::new();
        for i in 0..size {
            let (conn, rx) = open_connection(i, 1);
            registry.register(conn).unwrap();
            queues.push(rx);
        }

        group.bench_with_input(BenchmarkId::new("snapshot", size), &registry, |b, registry| {
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

/// Benchmark echo relay to the source
fn bench_echo(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(Router::new(RoutingPolicy::Echo, Arc::clone(&registry)));

    let (source, rx) = open_connection(1, 1024);
    registry.register(Arc::clone(&source)).unwrap();
    drain(&runtime, rx);

    let mut group = c.benchmark_group("echo");
    group.throughput(Throughput::Elements(1));

    for (name, payload) in [
        ("text_small", Payload::text("ping")),
        ("binary_1kb", Payload::binary(Bytes::from(vec![0u8; 1024]))),
    ] {
        group.bench_function(name, |b| {
            b.to_async(&runtime).iter(|| {
                let router = Arc::clone(&router);
                let source = Arc::clone(&source);
                let message = Message::new(source.id(), payload.clone());
                async move { black_box(router.relay(&source, message).await) }
            });
        });
    }

    group.finish();
}

/// Benchmark broadcast fan-out to N connections
fn bench_broadcast(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();

    let mut group = c.benchmark_group("broadcast");

    for fanout in [10u64, 100] {
        let registry = Arc::new(ConnectionRegistry::new());
        let policy = RoutingPolicy::Broadcast {
            include_source: false,
        };
        let router = Arc::new(Router::new(policy, Arc::clone(&registry)));

        let (source, rx) = open_connection(0, 1024);
        registry.register(Arc::clone(&source)).unwrap();
        drain(&runtime, rx);
        for id in 1..=fanout {
            let (conn, rx) = open_connection(id, 1024);
            registry.register(conn).unwrap();
            drain(&runtime, rx);
        }

        group.throughput(Throughput::Elements(fanout));
        group.bench_with_input(BenchmarkId::new("fanout", fanout), &fanout, |b, _| {
            b.to_async(&runtime).iter(|| {
                let router = Arc::clone(&router);
                let source = Arc::clone(&source);
                let message = Message::new(source.id(), Payload::text("hello everyone"));
                async move { black_box(router.relay(&source, message).await) }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_echo, bench_broadcast);

criterion_main!(benches);
