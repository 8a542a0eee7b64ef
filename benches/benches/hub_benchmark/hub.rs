use std::{hint::black_box, sync::Arc};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hubcast::{ConnectionHandle, HubPool, PoolConfig, Subscription};

/// Соединение без транспорта.
struct NullConn;

impl ConnectionHandle for NullConn {
    fn peer(&self) -> String {
        "bench".to_string()
    }

    fn close(&self) {}
}

fn conn() -> Arc<dyn ConnectionHandle> {
    Arc::new(NullConn)
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_fanout");

    for subscribers in [1usize, 10, 100, 1000] {
        let pool = HubPool::new(PoolConfig {
            client_queue_capacity: 4,
            ..Default::default()
        });
        let mut subs: Vec<Subscription> = (0..subscribers)
            .map(|_| pool.join_channel("bench", conn()))
            .collect();
        let message = Bytes::from_static(b"payload");

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let report = pool.broadcast("bench", black_box(message.clone()));
                    // очереди не должны заполняться между итерациями
                    for sub in subs.iter_mut() {
                        while sub.outbox.try_recv().is_some() {}
                    }
                    black_box(report)
                })
            },
        );
    }

    group.finish();
}

fn bench_join_leave_churn(c: &mut Criterion) {
    let pool = HubPool::default();

    c.bench_function("join_leave_single_member", |b| {
        // каждый leave опустошает хаб, поэтому каждый join создаёт новый
        b.iter(|| {
            let sub = pool.join_channel(black_box("churn"), conn());
            sub.client.leave();
        })
    });

    let _anchor = pool.join_channel("shared", conn());
    c.bench_function("join_leave_shared_hub", |b| {
        b.iter(|| {
            let sub = pool.join_channel(black_box("shared"), conn());
            sub.client.leave();
        })
    });
}

fn bench_many_channels(c: &mut Criterion) {
    let pool = HubPool::default();
    let channels: Vec<String> = (0..100).map(|i| format!("channel-{i}")).collect();

    c.bench_function("join_leave_100_channels", |b| {
        b.iter(|| {
            let subs: Vec<Subscription> = channels
                .iter()
                .map(|name| pool.join_channel(name, conn()))
                .collect();
            for sub in &subs {
                sub.client.leave();
            }
            black_box(pool.len())
        })
    });
}

criterion_group!(
    benches,
    bench_broadcast_fanout,
    bench_join_leave_churn,
    bench_many_channels
);
criterion_main!(benches);
