//! Benchmarks for the blocking handoff queue
//!
//! Measures the uncontended push/pop path and a cross-thread handoff where a
//! consumer waits in `pop` for every item.

use common::BlockingQueue;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(250);

fn benchmark_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");
    let queue = BlockingQueue::new();

    group.throughput(Throughput::Elements(1));
    group.bench_function("push_pop", |b| {
        b.iter(|| {
            queue.push(black_box(42u64));
            queue.pop(POLL)
        })
    });

    group.bench_function("try_pop_empty", |b| b.iter(|| queue.try_pop()));

    group.finish();
}

fn benchmark_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");
    const BATCH: u64 = 1000;
    group.throughput(Throughput::Elements(BATCH));

    group.bench_function("producer_to_waiting_consumer", |b| {
        b.iter(|| {
            let queue = Arc::new(BlockingQueue::new());
            let consumer = {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut received = 0;
                    while received < BATCH {
                        if queue.pop(POLL).is_some() {
                            received += 1;
                        }
                    }
                })
            };
            for i in 0..BATCH {
                queue.push(i);
            }
            let _ = consumer.join();
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_uncontended, benchmark_handoff);
criterion_main!(benches);
