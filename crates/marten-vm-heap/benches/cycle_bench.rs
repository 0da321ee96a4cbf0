//! Cycle collector benchmarks.
//!
//! Run with: `cargo bench -p marten-vm-heap`

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use marten_vm_heap::SharedHeap;

/// Link `n` atomic cells into a ring and drop every handle, leaving pure
/// cycle garbage behind.
fn build_ring(heap: &Arc<SharedHeap>, n: usize) {
    let cells: Vec<_> = (0..n).map(|_| heap.alloc_atomic(None)).collect();
    for i in 0..n {
        heap.atomic_store(&cells[i], Some(&cells[(i + 1) % n]));
    }
}

/// Time from collection request to the last cell of a garbage ring being
/// freed, including the rendezvous drain.
fn ring_reclaim_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_reclaim");
    for n in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("cells", n), &n, |bench, &n| {
            bench.iter_custom(|iters| {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let (heap, collector) = SharedHeap::bootstrap();
                    let worker = heap.attach_worker();
                    build_ring(&heap, n);

                    let start = Instant::now();
                    collector.request_collection();
                    while heap.live_objects() != 0 {
                        worker.safepoint();
                        std::thread::yield_now();
                    }
                    total += start.elapsed();

                    drop(worker);
                    collector.shutdown();
                }
                total
            });
        });
    }
    group.finish();
}

/// Mark-walk cost over a live ring: the external handle keeps everything
/// alive, so the cycle completes without releasing anything.
fn live_mark_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_mark");
    for n in [256usize, 4096] {
        group.bench_with_input(BenchmarkId::new("cells", n), &n, |bench, &n| {
            bench.iter_custom(|iters| {
                let (heap, collector) = SharedHeap::bootstrap();
                let worker = heap.attach_worker();
                let cells: Vec<_> = (0..n).map(|_| heap.alloc_atomic(None)).collect();
                for i in 0..n {
                    heap.atomic_store(&cells[i], Some(&cells[(i + 1) % n]));
                }

                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let before = collector.stats().cycles_completed;
                    let start = Instant::now();
                    collector.request_collection();
                    while collector.stats().cycles_completed == before {
                        worker.safepoint();
                        std::thread::yield_now();
                    }
                    total += start.elapsed();
                }

                // The ring outlives its handles; reclaim it before teardown.
                drop(cells);
                collector.request_collection();
                while heap.live_objects() != 0 {
                    worker.safepoint();
                    std::thread::yield_now();
                }
                drop(worker);
                collector.shutdown();
                total
            });
        });
    }
    group.finish();
}

criterion_group!(benches, ring_reclaim_benchmark, live_mark_benchmark);
criterion_main!(benches);
