//! Benchmarks for value dispatch through the graph
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rivulet_core::stream::{Filter, Handler, Map, Node, NodeOptions, Partitioner, TransformExt};

fn counting_handler<T>(sum: &Arc<AtomicU64>) -> Handler<T> {
    let sum = sum.clone();
    Handler::each(move |_| {
        sum.fetch_add(1, Ordering::Relaxed);
    })
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    group.throughput(Throughput::Elements(1));

    for width in [1usize, 4, 32].iter() {
        group.bench_with_input(BenchmarkId::new("next", width), width, |b, &width| {
            let root = Node::new(NodeOptions::default());
            let hits = Arc::new(AtomicU64::new(0));
            for _ in 0..width {
                root.subscribe(counting_handler(&hits), NodeOptions::default())
                    .unwrap();
            }
            let mut i = 0u64;
            b.iter(|| {
                root.next(black_box(i));
                i = i.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_transform_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_chain");
    group.throughput(Throughput::Elements(1));

    for depth in [1usize, 8].iter() {
        group.bench_with_input(BenchmarkId::new("depth", depth), depth, |b, &depth| {
            let root = Node::new(NodeOptions::default().with_cache(false));
            let mut tail = root.clone();
            for _ in 0..depth {
                tail = tail
                    .transform(
                        Map::new(|x: u64| x.wrapping_mul(3)).then(Filter::new(|x: &u64| x % 7 != 0)),
                        NodeOptions::default().with_cache(false),
                    )
                    .unwrap();
            }
            let hits = Arc::new(AtomicU64::new(0));
            tail.subscribe(counting_handler(&hits), NodeOptions::default())
                .unwrap();
            let mut i = 1u64;
            b.iter(|| {
                root.next(black_box(i));
                i = i.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_partition_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_flush");

    for batch in [16usize, 256].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch), batch, |b, &batch| {
            let ticks = Node::new(NodeOptions::default());
            let part = Partitioner::new(&ticks, NodeOptions::default().with_cache(false)).unwrap();
            let hits = Arc::new(AtomicU64::new(0));
            part.subscribe(counting_handler(&hits), NodeOptions::default())
                .unwrap();
            b.iter(|| {
                for v in 0..batch {
                    part.next(black_box(v));
                }
                ticks.next(());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_transform_chain, bench_partition_flush);
criterion_main!(benches);
