use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use debt_limit::DebtLimiter;
use hdrhistogram::Histogram;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_debt::LimitError;
use tower_debt::RateLimitLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Fire a burst of concurrent requests through the take and spin middleware.
#[derive(Debug, Parser)]
struct Args {
    /// Requests admitted per period
    #[arg(long, default_value_t = 1_000)]
    rate: i64,

    /// Requests that may be admitted back to back after idling
    #[arg(long, default_value_t = 100)]
    max_burst: u32,

    /// Window the rate is measured over
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    period: Duration,

    /// How long spinning requests may wait for a slot
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    max_spin: Duration,

    /// Simulated work done by each admitted request
    #[arg(long, default_value = "5ms", value_parser = humantime::parse_duration)]
    work: Duration,

    /// Total requests per scenario
    #[arg(long, default_value_t = 5_000)]
    requests: usize,
}

#[derive(Default)]
struct RejectionCounter {
    insufficient: usize,
    contended: usize,
    exhausted: usize,
    timeouts: usize,
    inner: usize,
    unknown: usize,
}

impl RejectionCounter {
    fn record(&mut self, err: &BoxError) {
        use debt_limit::Reason;

        match err.downcast_ref::<LimitError>() {
            Some(LimitError::RateLimited { reason }) => match reason {
                Reason::Insufficient { .. } => self.insufficient += 1,
                Reason::Contended => self.contended += 1,
                Reason::RetriesExhausted => self.exhausted += 1,
                Reason::TimedOut => self.timeouts += 1,
            },
            Some(LimitError::Inner(_)) => self.inner += 1,
            None => self.unknown += 1,
        }
    }

    fn total(&self) -> usize {
        self.insufficient + self.contended + self.exhausted + self.timeouts + self.inner + self.unknown
    }
}

async fn run_load_test<S>(name: &str, svc: S, total_reqs: usize) -> Result<(), BoxError>
where
    S: Service<(), Response = &'static str, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
{
    let mut hist_ready = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3)?;

    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let start = Instant::now();
    let barrier = Arc::new(Barrier::new(total_reqs));

    for _ in 0..total_reqs {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(()).await,
                Err(err) => Err(err),
            };
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;
    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task?;
        match res {
            Ok(_) => {
                success_count += 1;
                hist_ready.record(elapsed.as_nanos() as u64)?;
            }
            Err(err) => rejections.record(&err),
        }
    }

    let total_duration = start.elapsed();
    let goodput = success_count as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", success_count, total_reqs);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}ns", hist_ready.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}ns", hist_ready.value_at_quantile(0.99));
    }

    println!("Errors:          {}", rejections.total());
    if rejections.total() > 0 {
        println!("  └─ Insufficient: {}", rejections.insufficient);
        println!("  └─ Contended:    {}", rejections.contended);
        println!("  └─ Exhausted:    {}", rejections.exhausted);
        println!("  └─ Timeouts:     {}", rejections.timeouts);
        if rejections.inner > 0 {
            println!("  └─ Inner:        {}", rejections.inner);
        }
        if rejections.unknown > 0 {
            println!("  └─ Unknown:      {}", rejections.unknown);
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    info!(?args, "starting stress test");

    let work = args.work;
    let handler = move |_req: ()| async move {
        sleep(work).await;
        Ok::<_, BoxError>("success")
    };

    let take = Arc::new(DebtLimiter::new(args.rate, args.max_burst, args.period));
    let take_svc = RateLimitLayer::new(take).layer(service_fn(handler));
    run_load_test("Take", take_svc, args.requests).await?;

    let spin = Arc::new(DebtLimiter::new(args.rate, args.max_burst, args.period));
    let spin_svc = RateLimitLayer::new(spin)
        .with_spin(args.max_spin)
        .layer(service_fn(handler));
    run_load_test("Spin", spin_svc, args.requests).await?;

    Ok(())
}
