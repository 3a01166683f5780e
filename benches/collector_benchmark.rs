use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use apm_collector::aggregate::{AggregateInterval, IntervalLimits, QueryCollector, SharedQueryTextCollection};
use apm_collector::model::{AggregateMessage, StackFrame};
use apm_collector::rate_limiter::RateLimiter;
use apm_collector::transaction::{CapturedThrowable, ErrorMessage, FrameBudget, ThrowableSource};

fn bench_query_collector(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_collector");

    for distinct in [100usize, 1_000, 5_000] {
        group.throughput(Throughput::Elements(distinct as u64));
        group.bench_with_input(BenchmarkId::new("merge_query", distinct), &distinct, |b, &distinct| {
            let texts: Vec<String> = (0..distinct)
                .map(|index| format!("select * from orders where id = {}", index))
                .collect();
            b.iter(|| {
                let mut collector = QueryCollector::new(500, 2);
                for (index, text) in texts.iter().enumerate() {
                    collector.merge_query("SQL", black_box(text), index as f64, 1, false, 0, false);
                }
                black_box(collector.entry_count())
            })
        });
    }

    group.bench_function("to_aggregate_queries", |b| {
        let mut collector = QueryCollector::new(500, 2);
        for index in 0..2_000 {
            collector.merge_query("SQL", &format!("select {}", index), index as f64, 1, false, 0, false);
        }
        b.iter(|| {
            let mut texts = SharedQueryTextCollection::new();
            black_box(collector.to_aggregate_queries(&mut texts, false))
        })
    });

    group.finish();
}

fn bench_interval_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_interval");

    let mut source = QueryCollector::new(500, 2);
    for index in 0..200 {
        source.merge_query("SQL", &format!("select {}", index), 10.0, 1, true, 3, false);
    }
    let mut texts = SharedQueryTextCollection::new();
    let mut message = AggregateMessage::new("agent-1", "Web", 60_000);
    message.transaction_count = 1;
    message.total_duration_nanos = 1_000.0;
    message.queries = source.to_aggregate_queries(&mut texts, false);
    message.shared_query_texts = texts.into_texts();

    group.bench_function("merge_message", |b| {
        b.iter(|| {
            let mut interval = AggregateInterval::new("agent-1", "Web", None, IntervalLimits::default());
            for _ in 0..10 {
                interval.merge(black_box(&message));
            }
            black_box(interval.transaction_count())
        })
    });

    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");

    group.bench_function("try_acquire_new_keys", |b| {
        b.iter(|| {
            let limiter = RateLimiter::new("bench");
            for key in 0..1_000i64 {
                black_box(limiter.try_acquire(key));
            }
        })
    });

    group.bench_function("try_acquire_repeated_key", |b| {
        let limiter = RateLimiter::new("bench");
        limiter.try_acquire("agent-1".to_string());
        b.iter(|| black_box(limiter.try_acquire(black_box("agent-1".to_string()))))
    });

    group.finish();
}

fn throwable_chain(depth: usize, frames: usize) -> CapturedThrowable {
    let stack_trace: Vec<StackFrame> = (0..frames)
        .map(|index| StackFrame::new("com.shop.Checkout", &format!("step{}", index), Some("Checkout.java"), 10))
        .collect();
    let mut throwable = CapturedThrowable::new("java.io.IOException", Some("disk full"))
        .with_stack_trace(stack_trace.clone());
    for level in 0..depth {
        throwable = CapturedThrowable::new("java.lang.RuntimeException", Some(&format!("level {}", level)))
            .with_stack_trace(stack_trace.clone())
            .with_cause(throwable);
    }
    throwable
}

fn bench_error_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("error_message");

    for depth in [1usize, 10, 100] {
        let throwable = throwable_chain(depth, 40);
        group.bench_with_input(BenchmarkId::new("create", depth), &throwable, |b, throwable| {
            b.iter(|| {
                let mut budget = FrameBudget::new(100_000);
                let source: &dyn ThrowableSource = throwable;
                black_box(ErrorMessage::create("", Some(source), &mut budget))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_query_collector,
    bench_interval_merge,
    bench_rate_limiter,
    bench_error_message
);
criterion_main!(benches);
