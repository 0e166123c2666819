// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fan-out sequences: `buffered` keeps input order, `diffused` yields in completion order.
//!
//! Both map a function over a source sequence with up to `size` calls running ahead of the
//! consumer. A slot is taken when a call starts and freed when its result is delivered, so a slow
//! consumer throttles the source. Each `iterate` starts a fresh run; the iterator returned by one
//! step must be the one advanced next.

use core::any::Any;
use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::engine::{self, Cont};
use crate::error::{EngineError, ErrorKind, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

/// Largest accepted stream size.
pub const MAX_STREAM_SIZE: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Order {
    Arrival,
    Completion,
}

/// A sequence mapping a function over a source with bounded look-ahead.
pub struct Stream {
    order: Order,
    source: Value,
    function: Value,
    size: usize,
}

/// Returns a sequence of `function(key, value)` over `sequence`, in input order, with up to
/// `size` calls running ahead.
pub fn buffered(sequence: &Value, size: usize, function: &Value) -> Result<Value> {
    Stream::new(Order::Arrival, "Buffered size", sequence, size, function)
}

/// Returns a sequence of `function(key, value)` over `sequence`, in completion order, with up to
/// `size` calls running at once.
///
/// A slot is freed when its result is handed to the consumer, not when the call returns, so at
/// most `size` finished results wait for a slow consumer.
pub fn diffused(sequence: &Value, size: usize, function: &Value) -> Result<Value> {
    Stream::new(Order::Completion, "Diffused size", sequence, size, function)
}

impl Stream {
    fn new(
        order: Order,
        what: &'static str,
        source: &Value,
        size: usize,
        function: &Value,
    ) -> Result<Value> {
        if !(1..=MAX_STREAM_SIZE).contains(&size) {
            return Err(EngineError::OutOfRange { what });
        }
        Ok(Value::object(Arc::new(Self {
            order,
            source: source.clone(),
            function: function.clone(),
            size,
        })))
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("order", &self.order)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Object for Stream {
    fn type_of(&self) -> TypeRef {
        match self.order {
            Order::Arrival => types::BUFFERED.clone(),
            Order::Completion => types::DIFFUSED.clone(),
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn iterate(self: Arc<Self>, caller: Cont) {
        let run = Arc::new(Run {
            context: caller.context().clone(),
            order: self.order,
            source: self.source.clone(),
            function: self.function.clone(),
            size: self.size,
            state: Mutex::new(RunState {
                cursor: Cursor::Start,
                launched: 0,
                delivered: 0,
                ring: (0..self.size).map(|_| None).collect(),
                ready: VecDeque::new(),
                busy: 0,
                waiter: None,
                failure: None,
            }),
        });
        run.wait(caller);
    }
}

enum Cursor {
    Start,
    At(Value),
    Fetching,
    Exhausted,
}

struct RunState {
    cursor: Cursor,
    launched: usize,
    delivered: usize,
    ring: Vec<Option<(Value, Value)>>,
    ready: VecDeque<(Value, Value)>,
    busy: usize,
    waiter: Option<Cont>,
    failure: Option<Value>,
}

struct Run {
    context: Context,
    order: Order,
    source: Value,
    function: Value,
    size: usize,
    state: Mutex<RunState>,
}

enum Fetch {
    Begin,
    Next(Value),
}

impl Run {
    fn wait(self: &Arc<Self>, caller: Cont) {
        let refused = {
            let mut state = self.state.lock();
            if state.waiter.is_some() {
                Some(caller)
            } else {
                state.waiter = Some(caller);
                None
            }
        };
        if let Some(caller) = refused {
            let err = Value::error(ErrorKind::State, "stream is already being advanced");
            return engine::resume(caller, err);
        }
        self.fill();
        self.deliver();
    }

    fn fill(self: &Arc<Self>) {
        let fetch = {
            let mut state = self.state.lock();
            if state.busy >= self.size || state.failure.is_some() {
                return;
            }
            match core::mem::replace(&mut state.cursor, Cursor::Fetching) {
                Cursor::Start => Fetch::Begin,
                Cursor::At(iter) => Fetch::Next(iter),
                other => {
                    state.cursor = other;
                    return;
                }
            }
        };
        let run = Arc::clone(self);
        let fetched = engine::step(&self.context, move |iter| run.fetched(iter));
        match fetch {
            Fetch::Begin => engine::iterate(fetched, &self.source),
            Fetch::Next(iter) => engine::iter_next(fetched, &iter),
        }
    }

    fn fetched(self: Arc<Self>, iter: Value) {
        if iter.is_nil() || iter.is_error() {
            {
                let mut state = self.state.lock();
                state.cursor = Cursor::Exhausted;
                if iter.is_error() {
                    state.failure = Some(iter);
                }
            }
            return self.deliver();
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
        let slot = {
            let mut state = self.state.lock();
            let slot = state.launched;
            state.launched += 1;
            state.busy += 1;
            state.cursor = Cursor::At(iter);
            slot
        };
        let run = Arc::clone(&self);
        let result_key = key.clone();
        engine::call(
            engine::step(&self.context, move |result| run.completed(slot, result_key, result)),
            &self.function,
            vec![key, value],
        );
        self.fill();
    }

    fn completed(self: Arc<Self>, slot: usize, key: Value, result: Value) {
        {
            let mut state = self.state.lock();
            match self.order {
                Order::Arrival => state.ring[slot % self.size] = Some((key, result)),
                Order::Completion => state.ready.push_back((key, result)),
            }
        }
        self.deliver();
    }

    fn deliver(self: &Arc<Self>) {
        let (waiter, value) = {
            let mut state = self.state.lock();
            if state.waiter.is_none() {
                return;
            }
            let next = match self.order {
                Order::Arrival if state.delivered < state.launched => {
                    let index = state.delivered % self.size;
                    state.ring[index].take()
                }
                Order::Arrival => None,
                Order::Completion => state.ready.pop_front(),
            };
            let value = match next {
                Some((key, value)) => {
                    state.delivered += 1;
                    state.busy -= 1;
                    Value::object(Arc::new(StreamIter {
                        run: Arc::clone(self),
                        key,
                        value,
                    }))
                }
                None if state.busy == 0 && matches!(state.cursor, Cursor::Exhausted) => {
                    state.failure.take().unwrap_or(Value::Nil)
                }
                None => return,
            };
            (state.waiter.take(), value)
        };
        if let Some(waiter) = waiter {
            engine::resume(waiter, value);
        }
        self.fill();
    }
}

/// One delivered element of a stream.
struct StreamIter {
    run: Arc<Run>,
    key: Value,
    value: Value,
}

impl fmt::Debug for StreamIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIter")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Object for StreamIter {
    fn type_of(&self) -> TypeRef {
        types::ANY.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn iter_next(self: Arc<Self>, caller: Cont) {
        self.run.wait(caller);
    }

    fn iter_key(self: Arc<Self>, caller: Cont) {
        engine::resume(caller, self.key.clone());
    }

    fn iter_value(self: Arc<Self>, caller: Cont) {
        engine::resume(caller, self.value.clone());
    }
}
