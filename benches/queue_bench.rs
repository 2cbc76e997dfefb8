//! Stealable queue benchmarks.
//!
//! Measures the owner hot path (push/pop) and the steal path for each
//! discipline. The container is one ordered structure under a per-queue
//! mutex, so these numbers bound the scheduler's submission and
//! rebalancing costs.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use stealpool::pool::WorkItem;
use stealpool::{QueueDiscipline, StealableQueue};

fn bench_local_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_push_pop");
    for discipline in [
        QueueDiscipline::Fifo,
        QueueDiscipline::Stack,
        QueueDiscipline::Deque,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{discipline:?}")),
            &discipline,
            |b, &discipline| {
                let queue = StealableQueue::new(discipline, false);
                let mut seq = 0u64;
                b.iter(|| {
                    for i in 0..64u64 {
                        queue.local_push(WorkItem::new(|| {}, (i % 4) as u8, seq));
                        seq += 1;
                    }
                    while queue.local_pop().is_some() {}
                });
            },
        );
    }
    group.finish();
}

fn bench_steal(c: &mut Criterion) {
    c.bench_function("steal_64", |b| {
        let queue = StealableQueue::new(QueueDiscipline::Fifo, false);
        let stealer = queue.stealer();
        let mut seq = 0u64;
        b.iter(|| {
            for i in 0..64u64 {
                queue.local_push(WorkItem::new(|| {}, (i % 4) as u8, seq));
                seq += 1;
            }
            while stealer.steal().is_some() {}
        });
    });
}

fn bench_contended_steal(c: &mut Criterion) {
    c.bench_function("owner_pop_vs_4_stealers", |b| {
        b.iter_custom(|iters| {
            let queue = StealableQueue::new(QueueDiscipline::Fifo, false);
            let mut seq = 0u64;
            for _ in 0..iters {
                for i in 0..8u64 {
                    queue.local_push(WorkItem::new(|| {}, (i % 4) as u8, seq));
                    seq += 1;
                }
            }
            let start = std::time::Instant::now();
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let stealer = queue.stealer();
                    scope.spawn(move || while stealer.steal().is_some() {});
                }
                while queue.local_pop().is_some() {}
            });
            start.elapsed()
        });
    });
}

criterion_group!(
    benches,
    bench_local_push_pop,
    bench_steal,
    bench_contended_steal
);
criterion_main!(benches);
