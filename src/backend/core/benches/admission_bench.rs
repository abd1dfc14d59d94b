//! Benchmarks for admission control and retry sweeps
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use serde_json::json;
use sma_core::admission::{AdmissionConfig, AdmissionController, Priority};
use sma_core::clock::ManualClock;
use sma_core::retry::{JobKind, JobResult, RetryConfig, RetryQueueEngine};
use sma_core::SmaError;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark a single uncontended submit.
fn bench_submit_uncontended(c: &mut Criterion) {
    let rt = runtime();
    let controller = AdmissionController::new(AdmissionConfig::default()).unwrap();

    c.bench_function("admission_submit_uncontended", |b| {
        b.to_async(&rt).iter(|| async {
            let value = controller
                .submit(Priority::Normal, || async { Ok::<_, SmaError>(black_box(42u64)) })
                .await
                .unwrap();
            black_box(value)
        });
    });
}

/// Benchmark bursts of 256 submits against varying slot counts.
fn bench_submit_burst(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("admission_submit_burst");
    let burst = 256usize;

    for max_concurrent in [1usize, 8, 64, 256].iter() {
        let controller = Arc::new(AdmissionController::new(
            AdmissionConfig::default()
                .with_max_concurrent(*max_concurrent)
                .with_timeouts(60_000, 60_000),
        )
        .unwrap());

        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(max_concurrent),
            max_concurrent,
            |b, _| {
                b.to_async(&rt).iter(|| {
                    let controller = controller.clone();
                    async move {
                        let submits = (0..burst).map(|i| {
                            let controller = controller.clone();
                            let priority = if i % 16 == 0 {
                                Priority::High
                            } else {
                                Priority::Normal
                            };
                            async move {
                                controller
                                    .submit(priority, move || async move {
                                        tokio::task::yield_now().await;
                                        Ok::<_, SmaError>(i)
                                    })
                                    .await
                            }
                        });
                        black_box(join_all(submits).await)
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a sweep over due jobs that all succeed.
fn bench_retry_sweep(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("retry_sweep");

    for job_count in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*job_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(job_count),
            job_count,
            |b, &count| {
                b.to_async(&rt).iter(|| async move {
                    let clock = Arc::new(ManualClock::starting_now());
                    let engine = RetryQueueEngine::new(RetryConfig::default())
                        .unwrap()
                        .with_clock(clock.clone())
                        .with_handler(JobKind::PostPublish, |_payload: serde_json::Value| async {
                            JobResult::Ok(())
                        });

                    for i in 0..count {
                        engine
                            .enqueue(JobKind::PostPublish, json!({ "post_id": i }), None)
                            .await
                            .unwrap();
                    }
                    clock.advance(chrono::Duration::seconds(61));

                    black_box(engine.sweep_now().await)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_submit_uncontended,
    bench_submit_burst,
    bench_retry_sweep,
);
criterion_main!(benches);
