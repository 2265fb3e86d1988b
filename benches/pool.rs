use criterion::*;
use crossbeam_channel::bounded;
use workpool::{BoundedQueue, Interrupt, WorkerPool};

fn criterion_benchmark(c: &mut Criterion) {
    let threads = num_cpus::get().max(1);

    let tasks = 1000;

    let mut group = c.benchmark_group("pool");
    group.sample_size(10);

    group.bench_function("execute", |b| {
        b.iter_batched(
            || WorkerPool::builder().size(threads).build(),
            |pool| {
                let (done_tx, done_rx) = bounded(tasks);

                for _ in 0..tasks {
                    let done_tx = done_tx.clone();

                    pool.execute(move || {
                        let _ = black_box(8 + 9);
                        let _ = done_tx.send(());
                    });
                }

                for _ in 0..tasks {
                    done_rx.recv().unwrap();
                }

                pool.shutdown();
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("queue_offer_take", |b| {
        let interrupt = Interrupt::new();

        b.iter_batched(
            || BoundedQueue::new(tasks),
            |queue| {
                for i in 0..tasks {
                    queue.offer(black_box(i)).unwrap();
                }

                for _ in 0..tasks {
                    black_box(queue.take(&interrupt));
                }
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
