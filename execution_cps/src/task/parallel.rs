// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::engine::{self, Cont};
use crate::error::EngineError;
use crate::value::Value;

/// In-flight limits for [`parallel`].
///
/// Iteration pauses once `max` calls are in flight and resumes when the count has dropped to
/// `min` (default `max - 1`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FanOut {
    /// Calls in flight at which iteration pauses.
    pub max: usize,
    /// Calls in flight at or below which paused iteration resumes.
    pub min: Option<usize>,
}

impl FanOut {
    /// Limits pausing at `max` and resuming as soon as one call finishes.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self { max, min: None }
    }

    /// Sets the resume threshold.
    #[must_use]
    pub const fn with_min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    fn resume_at(&self) -> usize {
        self.min.map_or(self.max - 1, |min| min.min(self.max - 1))
    }
}

struct State {
    caller: Option<Cont>,
    paused: Option<Value>,
    in_flight: usize,
    exhausted: bool,
}

struct Parallel {
    context: Context,
    function: Value,
    limits: FanOut,
    state: Mutex<State>,
}

/// Calls `function(key, value)` for every element of `sequence` without waiting for each call.
///
/// `caller` is resumed with `nil` once the sequence is exhausted and every call has finished, or
/// with the first error produced by the iteration or by a call; results arriving after that are
/// dropped. A zero `max` resumes `caller` with a `RangeError`.
pub fn parallel(caller: Cont, sequence: &Value, limits: FanOut, function: Value) {
    if limits.max == 0 {
        let err = EngineError::OutOfRange {
            what: "Parallel limit",
        };
        return engine::resume(caller, err.into());
    }
    let run = Arc::new(Parallel {
        context: caller.context().clone(),
        function,
        limits,
        state: Mutex::new(State {
            caller: Some(caller),
            paused: None,
            in_flight: 0,
            exhausted: false,
        }),
    });
    let next = Arc::clone(&run);
    engine::iterate(
        engine::step(&run.context, move |iter| next.advance(iter)),
        sequence,
    );
}

impl Parallel {
    fn advance(self: Arc<Self>, iter: Value) {
        if iter.is_error() {
            return self.finish(iter);
        }
        if iter.is_nil() {
            let done = {
                let mut state = self.state.lock();
                state.exhausted = true;
                state.in_flight == 0
            };
            if done {
                self.finish(Value::Nil);
            }
            return;
        }
        let context = self.context.clone();
        let it = iter.clone();
        engine::iter_key(
            engine::step(&context.clone(), move |key| {
                let current = it.clone();
                engine::iter_value(
                    engine::step(&context, move |value| self.launch(current, key, value)),
                    &it,
                );
            }),
            &iter,
        );
    }

    fn launch(self: Arc<Self>, iter: Value, key: Value, value: Value) {
        if value.is_error() {
            return self.finish(value);
        }
        let carry_on = {
            let mut state = self.state.lock();
            if state.caller.is_none() {
                return;
            }
            state.in_flight += 1;
            if state.in_flight >= self.limits.max {
                state.paused = Some(iter.clone());
                false
            } else {
                true
            }
        };
        let run = Arc::clone(&self);
        engine::call(
            engine::step(&self.context, move |result| run.completed(result)),
            &self.function,
            vec![key, value],
        );
        if carry_on {
            self.next_after(&iter);
        }
    }

    fn next_after(self: Arc<Self>, iter: &Value) {
        let run = Arc::clone(&self);
        engine::iter_next(
            engine::step(&self.context, move |next| run.advance(next)),
            iter,
        );
    }

    fn completed(self: Arc<Self>, result: Value) {
        if result.is_error() {
            return self.finish(result);
        }
        let (resume, done) = {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            let resume = if state.in_flight <= self.limits.resume_at() {
                state.paused.take()
            } else {
                None
            };
            (resume, state.exhausted && state.in_flight == 0)
        };
        if done {
            self.finish(Value::Nil);
        } else if let Some(iter) = resume {
            self.next_after(&iter);
        }
    }

    fn finish(&self, value: Value) {
        let caller = {
            let mut state = self.state.lock();
            state.paused = None;
            state.caller.take()
        };
        if let Some(caller) = caller {
            engine::resume(caller, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{Capture, list, range};
    use core::sync::atomic::{AtomicUsize, Ordering};

    type Parked = Arc<Mutex<Vec<Cont>>>;

    fn parking_function(parked: &Parked, peak: &Arc<AtomicUsize>) -> Value {
        let parked = Arc::clone(parked);
        let peak = Arc::clone(peak);
        Value::function_x(move |caller, _| {
            let mut parked = parked.lock();
            parked.push(caller);
            peak.fetch_max(parked.len(), Ordering::Relaxed);
        })
    }

    #[test]
    fn in_flight_calls_never_exceed_max() {
        let context = Context::root();
        let capture = Capture::new(&context);
        let parked: Parked = Arc::default();
        let peak = Arc::new(AtomicUsize::new(0));
        let function = parking_function(&parked, &peak);
        parallel(capture.cont(), &range(10), FanOut::new(3), function);
        let mut finished = 0;
        loop {
            let next = {
                let mut parked = parked.lock();
                (!parked.is_empty()).then(|| parked.remove(0))
            };
            let Some(call) = next else { break };
            call.resume(Value::Nil);
            finished += 1;
        }
        assert_eq!(finished, 10);
        assert_eq!(peak.load(Ordering::Relaxed), 3);
        assert_eq!(capture.take(), Some(Value::Nil));
    }

    #[test]
    fn hysteresis_waits_for_min_before_resuming() {
        let context = Context::root();
        let capture = Capture::new(&context);
        let parked: Parked = Arc::default();
        let peak = Arc::new(AtomicUsize::new(0));
        let function = parking_function(&parked, &peak);
        let limits = FanOut::new(4).with_min(1);
        parallel(capture.cont(), &range(6), limits, function);
        assert_eq!(parked.lock().len(), 4);
        for expected in [3, 2] {
            let call = parked.lock().remove(0);
            call.resume(Value::Nil);
            assert_eq!(parked.lock().len(), expected);
        }
        let call = parked.lock().remove(0);
        call.resume(Value::Nil);
        assert_eq!(parked.lock().len(), 3);
    }

    #[test]
    fn first_error_finishes_the_run() {
        let context = Context::root();
        let capture = Capture::new(&context);
        let function = Value::function(|args| {
            if args[1] == Value::Int(2) {
                Value::error(ErrorKind::State, "two")
            } else {
                Value::Nil
            }
        });
        parallel(capture.cont(), &range(5), FanOut::new(2), function);
        let result = capture.take().expect("finished");
        assert!(result.as_error().is_some_and(|e| e.message() == "two"));
        assert!(capture.take().is_none());
    }

    #[test]
    fn function_receives_key_then_value() {
        let context = Context::root();
        let capture = Capture::new(&context);
        let seen: Arc<Mutex<Vec<(Value, Value)>>> = Arc::default();
        let record = {
            let seen = Arc::clone(&seen);
            Value::function(move |args| {
                seen.lock().push((args[0].clone(), args[1].clone()));
                Value::Nil
            })
        };
        let sequence = list(vec![Value::str("a"), Value::str("b")]);
        parallel(capture.cont(), &sequence, FanOut::new(usize::MAX), record);
        assert_eq!(capture.take(), Some(Value::Nil));
        assert_eq!(
            *seen.lock(),
            [
                (Value::Int(1), Value::str("a")),
                (Value::Int(2), Value::str("b")),
            ]
        );
    }

    #[test]
    fn zero_max_is_out_of_range() {
        let context = Context::root();
        let capture = Capture::new(&context);
        parallel(capture.cont(), &range(1), FanOut::new(0), Value::Nil);
        let err = capture.take().expect("answered at once");
        assert!(err.as_error().is_some_and(|e| e.is(ErrorKind::Range)));
    }
}
