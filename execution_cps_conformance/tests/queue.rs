// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! FIFO behaviour of block queues and the queue scheduler.

use std::collections::VecDeque;

use execution_cps::queue::BlockQueue;
use execution_cps::scheduler::Scheduler;
use execution_cps::{Context, Queue, QueueConfig, Value, engine};
use execution_cps_conformance::Capture;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Push(u32),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #[test]
    fn block_queue_matches_a_deque(
        capacity in 1..8_usize,
        ops in prop::collection::vec(op(), 0..200),
    ) {
        let mut queue = BlockQueue::new(capacity);
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(v) => {
                    queue.push(v);
                    model.push_back(v);
                }
                Op::Pop => prop_assert_eq!(queue.pop(), model.pop_front()),
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert!(queue.block_count() <= model.len().div_ceil(capacity) + 1);
        }
        while let Some(v) = model.pop_front() {
            prop_assert_eq!(queue.pop(), Some(v));
        }
        prop_assert!(queue.is_empty());
    }
}

#[test]
fn scheduled_resumes_drain_in_order_past_one_block() {
    let queue = Queue::new(QueueConfig {
        block_capacity: 4,
        ..QueueConfig::default()
    })
    .expect("queue");
    let context = queue.scope(&Context::root());
    let capture = Capture::new(&context);
    for n in 0..11 {
        engine::schedule(capture.cont(), Value::Int(n));
    }
    assert_eq!(queue.fill(), 11);
    assert_eq!(capture.count(), 0);
    while queue.run_one() {}
    let drained: Vec<_> = std::iter::from_fn(|| capture.take()).collect();
    assert_eq!(drained, (0..11).map(Value::Int).collect::<Vec<_>>());
}

#[test]
fn time_slice_defers_to_the_queue() {
    let queue = Queue::new(QueueConfig {
        time_slice: Some(1),
        ..QueueConfig::default()
    })
    .expect("queue");
    let context = queue.scope(&Context::root());
    let capture = Capture::new(&context);
    engine::resume(capture.cont(), Value::Int(1));
    engine::resume(capture.cont(), Value::Int(2));
    // A slice of one defers every resume.
    assert_eq!(capture.count(), 0);
    assert_eq!(queue.fill(), 2);
    while queue.run_one() {}
    assert_eq!(capture.count(), 2);
}
