// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Semaphore round trips, read/write lock fairness, and channel rendezvous.

use std::sync::Arc;

use execution_cps::sync::{Channel, Condition, RwLock, Semaphore};
use execution_cps::{Context, Value, engine};
use execution_cps_conformance::Capture;
use parking_lot::Mutex;
use proptest::prelude::*;

proptest! {
    #[test]
    fn n_waits_pass_and_the_next_parks_until_signal(n in 0..32_i64) {
        let context = Context::root();
        let capture = Capture::new(&context);
        let sem = Semaphore::new(n);
        for _ in 0..n {
            sem.wait(capture.cont());
        }
        prop_assert_eq!(capture.count(), usize::try_from(n).unwrap_or(0));
        prop_assert_eq!(sem.value(), 0);
        let before = capture.count();
        sem.wait(capture.cont());
        prop_assert_eq!(capture.count(), before);
        prop_assert_eq!(sem.waiting(), 1);
        sem.signal();
        prop_assert_eq!(capture.count(), before + 1);
        prop_assert_eq!(sem.waiting(), 0);
    }
}

#[derive(Clone, Copy, Debug)]
enum LockOp {
    Read,
    Write,
    Unlock,
}

fn lock_op() -> impl Strategy<Value = LockOp> {
    prop_oneof![Just(LockOp::Read), Just(LockOp::Write), Just(LockOp::Unlock)]
}

proptest! {
    #[test]
    fn writers_are_never_overtaken_by_later_readers(ops in prop::collection::vec(lock_op(), 0..64)) {
        let context = Context::root();
        let lock = RwLock::new();
        // Request id and kind, in request order.
        let mut requests: Vec<bool> = Vec::new();
        let admitted: Arc<Mutex<Vec<usize>>> = Arc::default();
        let mut held: Vec<bool> = Vec::new();
        let mut seen = 0;
        for op in ops {
            match op {
                LockOp::Read | LockOp::Write => {
                    let id = requests.len();
                    let is_writer = matches!(op, LockOp::Write);
                    requests.push(is_writer);
                    let log = Arc::clone(&admitted);
                    let caller = engine::step(&context, move |_| log.lock().push(id));
                    if is_writer {
                        lock.wrlock(caller);
                    } else {
                        lock.rdlock(caller);
                    }
                }
                LockOp::Unlock => {
                    if held.is_empty() {
                        prop_assert!(lock.unlock().is_err());
                        continue;
                    }
                    lock.unlock().expect("held");
                    match held.iter().position(|&w| w) {
                        Some(index) => {
                            held.remove(index);
                        }
                        None => {
                            held.pop();
                        }
                    }
                }
            }
            let log = admitted.lock();
            for &id in &log[seen..] {
                held.push(requests[id]);
            }
            seen = log.len();
            let writers = held.iter().filter(|&&w| w).count();
            prop_assert!(writers <= 1);
            prop_assert!(writers == 0 || held.len() == 1);
            prop_assert_eq!(lock.holders(), (held.len() - writers, writers == 1));
        }

        let log = admitted.lock();
        let position = |id: usize| log.iter().position(|&a| a == id);
        for (writer, _) in requests.iter().enumerate().filter(|(_, w)| **w) {
            for reader in (writer + 1..requests.len()).filter(|&r| !requests[r]) {
                if let Some(r) = position(reader) {
                    prop_assert!(position(writer).is_some_and(|w| w < r));
                }
            }
        }
    }
}

#[test]
fn condition_hands_the_semaphore_back_to_each_waiter() {
    let context = Context::root();
    let capture = Capture::new(&context);
    let sem = Semaphore::new(1);
    let cond = Condition::new();
    sem.wait(capture.cont());
    assert_eq!(capture.take(), Some(Value::Int(0)));
    cond.wait(capture.cont(), &sem);
    assert_eq!(sem.value(), 1);
    assert_eq!(cond.waiting(), 1);
    assert!(cond.signal());
    assert_eq!(capture.count(), 1);
    assert_eq!(sem.value(), 0);
    assert!(!cond.signal());
}

#[test]
fn channel_values_arrive_in_generation_order() {
    let context = Context::root();
    let capture = Capture::new(&context);
    let channel = Channel::new();
    let producer = {
        let channel = Arc::clone(&channel);
        Value::function_x(move |caller, _| {
            let next = Arc::clone(&channel);
            channel.send(
                engine::then(caller, move |caller, _| {
                    next.send(caller, Value::Int(2));
                }),
                Value::Int(1),
            );
        })
    };
    channel.start(capture.cont(), &producer, Vec::new());
    assert_eq!(capture.take(), Some(Value::Int(1)));
    channel.next(capture.cont(), Value::Nil);
    assert_eq!(capture.take(), Some(Value::Int(2)));
    // The last reply becomes the generator's return value, delivered as the closing value.
    channel.next(capture.cont(), Value::str("bye"));
    assert_eq!(capture.take(), Some(Value::str("bye")));
    assert!(!channel.is_open());
}
