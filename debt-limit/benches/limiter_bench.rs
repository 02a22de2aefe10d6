use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use debt_limit::DebtLimiter;
use debt_limit::Limiter;

type Governor = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

fn bench_single<F>(group_name: &str, c: &mut Criterion, attempt: F)
where
    F: Fn() -> bool,
{
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| black_box(attempt()));
    });

    group.finish();
}

fn bench_parallel<F>(group_name: &str, c: &mut Criterion, attempt: Arc<F>)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let attempt = Arc::clone(&attempt);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                black_box(attempt());
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let rate = 1_000_000;
    let period = Duration::from_secs(60);

    // Admitting: enough budget that every take succeeds.
    let open = Arc::new(DebtLimiter::new(rate, rate as u32, period));
    // Rejecting: after the first take every call is refused without a CAS.
    let closed = Arc::new(DebtLimiter::new(1, 0, Duration::from_secs(3600)));
    let _ = closed.take();

    let quota = Quota::per_minute(NonZeroU32::new(rate as u32).unwrap());
    let gov: Arc<Governor> = Arc::new(RateLimiter::direct_with_clock(
        quota,
        QuantaClock::default(),
    ));

    {
        let rl = Arc::clone(&open);
        bench_single("Debt-Admitting", c, move || rl.take());
    }
    {
        let rl = Arc::clone(&open);
        bench_parallel("Debt-Admitting", c, Arc::new(move || rl.take()));
    }
    {
        let rl = Arc::clone(&closed);
        bench_single("Debt-Rejecting", c, move || rl.take());
    }
    {
        let rl = Arc::clone(&closed);
        bench_parallel("Debt-Rejecting", c, Arc::new(move || rl.take()));
    }
    {
        let rl = Arc::clone(&gov);
        bench_single("Governor", c, move || rl.check().is_ok());
    }
    {
        let rl = Arc::clone(&gov);
        bench_parallel("Governor", c, Arc::new(move || rl.check().is_ok()));
    }
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
