//! Benchmarks for the retry hot path using criterion.
//!
//! These benchmarks measure the performance of:
//! - Error classification across message shapes
//! - Backoff delay computation with and without jitter
//! - A successful `execute` call and a failed-job registration

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keel::retry::{compute_backoff_delay, retry_delay};
use keel::{
    classify_error, FailedJobRecoveryStore, FailureReport, OperationContext, RetryExecutor,
    RetryPolicy,
};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

/// Benchmark: classify representative error messages.
fn bench_classify(c: &mut Criterion) {
    let messages = [
        ("network", "read ECONNRESET while fetching https://example.com/p/1"),
        ("client", "HTTP 404 Not Found"),
        ("server", "502 Bad Gateway from upstream"),
        ("unknown", "unexpected token < in JSON at position 0"),
    ];

    let mut group = c.benchmark_group("classify_error");
    for (name, message) in messages {
        group.bench_with_input(BenchmarkId::from_parameter(name), message, |b, m| {
            b.iter(|| classify_error(black_box(m)));
        });
    }

    let long = format!("{} connection reset", "context frame; ".repeat(200));
    group.bench_function("long_chain", |b| {
        b.iter(|| classify_error(black_box(&long)));
    });
    group.finish();
}

/// Benchmark: backoff computation.
fn bench_backoff(c: &mut Criterion) {
    let base = Duration::from_millis(100);
    let max = Duration::from_secs(30);

    let mut group = c.benchmark_group("backoff");
    group.bench_function("deterministic", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(compute_backoff_delay(black_box(attempt), base, 2.0, max));
            }
        });
    });
    group.bench_function("jittered", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(retry_delay(black_box(attempt), base, 2.0, max, true));
            }
        });
    });
    group.finish();
}

/// Benchmark: executor overhead on an operation that succeeds immediately.
fn bench_execute(c: &mut Criterion) {
    let rt = create_runtime();
    let executor = RetryExecutor::default();
    let policy = RetryPolicy::no_retry();

    let mut group = c.benchmark_group("execute");
    group.sample_size(100);
    group.bench_function("first_attempt_success", |b| {
        b.to_async(&rt).iter(|| async {
            let outcome = executor
                .execute(|| async { Ok::<_, anyhow::Error>(42u32) }, &policy, OperationContext::new("bench"))
                .await;
            black_box(outcome.attempts_used);
        });
    });
    group.finish();
}

/// Benchmark: repeated failure registration for a small task population.
fn bench_record_failure(c: &mut Criterion) {
    let rt = create_runtime();
    let store = FailedJobRecoveryStore::default();

    let mut group = c.benchmark_group("record_failure");
    group.bench_function("repeat_tasks", |b| {
        let mut n = 0u64;
        b.to_async(&rt).iter(|| {
            n += 1;
            let report = FailureReport::new(format!("task-{}", n % 64), "bench", "socket timeout");
            let store = &store;
            async move {
                black_box(store.record_failure(report).await.failure_count);
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_backoff,
    bench_execute,
    bench_record_failure
);
criterion_main!(benches);
