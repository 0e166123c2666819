// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{self, Cont};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

#[derive(Debug)]
struct State {
    value: i64,
    waiters: VecDeque<Cont>,
}

/// Counting semaphore.
///
/// Waiters are resumed with the semaphore's value after their acquisition.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
}

impl Semaphore {
    /// Creates a semaphore with `value` units; negative values are clamped to zero.
    #[must_use]
    pub fn new(value: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                value: value.max(0),
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Takes a unit, or parks `caller` until one is signalled.
    pub fn wait(&self, caller: Cont) {
        let acquired = {
            let mut state = self.state.lock();
            if state.value > 0 {
                state.value -= 1;
                Some((caller, state.value))
            } else {
                state.waiters.push_back(caller);
                None
            }
        };
        if let Some((caller, value)) = acquired {
            engine::resume(caller, Value::Int(value));
        }
    }

    /// Takes a unit if one is available without parking.
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Hands a unit to the oldest waiter, or stores it. Returns the new value.
    pub fn signal(&self) -> i64 {
        let (woken, value) = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(waiter) => (Some(waiter), state.value),
                None => {
                    state.value += 1;
                    (None, state.value)
                }
            }
        };
        if let Some(waiter) = woken {
            engine::resume(waiter, Value::Int(value));
        }
        value
    }

    /// Returns the number of available units.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.state.lock().value
    }

    /// Returns the number of parked waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Object for Semaphore {
    fn type_of(&self) -> TypeRef {
        types::SEMAPHORE.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::test_support::Capture;

    #[test]
    fn n_waits_succeed_then_the_next_parks_until_signal() {
        let context = Context::root();
        let sem = Semaphore::new(3);
        let capture = Capture::new(&context);
        for _ in 0..3 {
            sem.wait(capture.cont());
        }
        assert_eq!(capture.count(), 3);
        assert_eq!(sem.value(), 0);
        let parked = Capture::new(&context);
        sem.wait(parked.cont());
        assert_eq!(parked.count(), 0);
        assert_eq!(sem.waiting(), 1);
        assert_eq!(sem.signal(), 0);
        assert_eq!(parked.take(), Some(Value::Int(0)));
        assert_eq!(sem.signal(), 1);
    }

    #[test]
    fn waiters_are_released_in_arrival_order() {
        let context = Context::root();
        let sem = Semaphore::new(0);
        let order = Capture::new(&context);
        for n in 0..4 {
            let order = order.clone();
            sem.wait(engine::step(&context, move |_| {
                engine::resume(order.cont(), Value::Int(n));
            }));
        }
        for _ in 0..4 {
            sem.signal();
        }
        let seen: Vec<Value> = core::iter::from_fn(|| order.take()).collect();
        assert_eq!(seen, (0..4).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn try_wait_and_negative_initial_value() {
        let sem = Semaphore::new(-5);
        assert_eq!(sem.value(), 0);
        assert!(!sem.try_wait());
        sem.signal();
        assert!(sem.try_wait());
    }
}
