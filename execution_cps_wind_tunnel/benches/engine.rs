// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use execution_cps::queue::BlockQueue;
use execution_cps::scheduler::Scheduler;
use execution_cps::task::{self, Task};
use execution_cps::types::{self, Type, TypeRef};
use execution_cps::{Context, Method, MethodTable, Queue, QueueConfig, Value, engine};
use std::sync::Arc;

/// Entry point for `execution_cps` wind-tunnel benchmarks.
///
/// The scenarios isolate the hot paths of the engine: block queue churn, queued resumes,
/// dispatch with a warm cache, dispatch right after an invalidation, and task fan-in.
fn bench_engine(c: &mut Criterion) {
    bench_block_queue(c);
    bench_queue_drain(c);
    bench_dispatch_cached(c);
    bench_dispatch_invalidated(c);
    bench_task_fan_in(c);
}

/// Push `n` items and drain them, crossing block boundaries.
fn bench_block_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_queue_fill_drain");
    for &n in &[64_usize, 1_024, 16_384] {
        let mut queue = BlockQueue::new(256);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                for i in 0..n {
                    queue.push(black_box(i));
                }
                while let Some(v) = queue.pop() {
                    black_box(v);
                }
            });
        });
    }
    group.finish();
}

/// Schedule `n` resumes on a queue scheduler and run them all on this thread.
fn bench_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_schedule_drain");
    for &n in &[16_usize, 256, 4_096] {
        let queue = Queue::new(QueueConfig::default()).unwrap();
        let context = queue.scope(&Context::root());
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    engine::schedule(engine::discard(&context), Value::Nil);
                }
                while queue.run_one() {}
            });
        });
    }
    group.finish();
}

/// A chain of `depth` types, each deriving from the previous one.
fn type_chain(depth: usize) -> Vec<TypeRef> {
    let mut chain = vec![types::ANY.clone()];
    for i in 0..depth {
        let parent = Arc::clone(&chain[chain.len() - 1]);
        chain.push(Type::new(&format!("t{i}"), &[parent]));
    }
    chain
}

/// A table with one definition per prefix of `chain`, for a two-argument method.
fn populated_table(method: &Arc<Method>, chain: &[TypeRef]) -> Arc<MethodTable> {
    let table = MethodTable::new();
    for (i, ty) in chain.iter().enumerate() {
        let tag = i64::try_from(i).unwrap_or(i64::MAX);
        table.define(method, vec![Arc::clone(ty), Arc::clone(ty)], false, Value::Int(tag));
    }
    table
}

/// Steady-state resolution when the cache already holds the answer.
fn bench_dispatch_cached(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_cached");
    for &depth in &[4_usize, 16, 64] {
        let method = Method::new("m");
        let chain = type_chain(depth);
        let table = populated_table(&method, &chain);
        let leaf = Arc::clone(&chain[depth]);
        let args = [Arc::clone(&leaf), leaf];
        let _ = table.resolve(&method, &args);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(table.resolve(&method, black_box(&args))));
        });
    }
    group.finish();
}

/// Resolution right after a definition invalidated the method's cache entries.
fn bench_dispatch_invalidated(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_after_define");
    for &depth in &[4_usize, 16, 64] {
        let method = Method::new("m");
        let chain = type_chain(depth);
        let leaf = Arc::clone(&chain[depth]);
        let args = [Arc::clone(&leaf), leaf];
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter_batched(
                || {
                    let table = populated_table(&method, &chain);
                    let _ = table.resolve(&method, &args);
                    table
                },
                |table| {
                    table.define(&method, vec![types::ANY.clone()], true, Value::Nil);
                    black_box(table.resolve(&method, &args))
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Resolve `n` tasks feeding one `all` set.
fn bench_task_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_all_fan_in");
    let context = Context::root();
    for &n in &[8_usize, 128, 2_048] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let tasks: Vec<Arc<Task>> = (0..n).map(|_| Task::new()).collect();
                let set = task::all(&context, &tasks);
                for (i, t) in tasks.iter().enumerate() {
                    let value = Value::Int(i64::try_from(i).unwrap_or(0));
                    t.done(value).unwrap();
                }
                black_box(set.value())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
