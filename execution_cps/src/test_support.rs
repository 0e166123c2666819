// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared helpers for unit tests: a list-backed sequence and a value-capturing continuation.

use core::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::engine::{self, Cont};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

/// Records every value it is resumed with.
#[derive(Clone, Debug)]
pub(crate) struct Capture {
    context: Context,
    values: Arc<Mutex<Vec<Value>>>,
}

impl Capture {
    pub(crate) fn new(context: &Context) -> Self {
        Self {
            context: context.clone(),
            values: Arc::default(),
        }
    }

    pub(crate) fn cont(&self) -> Cont {
        let values = Arc::clone(&self.values);
        engine::step(&self.context, move |value| values.lock().push(value))
    }

    /// Removes and returns the oldest recorded value.
    pub(crate) fn take(&self) -> Option<Value> {
        let mut values = self.values.lock();
        (!values.is_empty()).then(|| values.remove(0))
    }

    pub(crate) fn count(&self) -> usize {
        self.values.lock().len()
    }
}

#[derive(Debug)]
struct List {
    items: Vec<Value>,
}

#[derive(Debug)]
struct ListIter {
    list: Arc<List>,
    index: usize,
}

impl Object for List {
    fn type_of(&self) -> TypeRef {
        types::SEQUENCE.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn iterate(self: Arc<Self>, caller: Cont) {
        if self.items.is_empty() {
            return engine::resume(caller, Value::Nil);
        }
        engine::resume(caller, Value::object(Arc::new(ListIter { list: self, index: 0 })));
    }
}

impl Object for ListIter {
    fn type_of(&self) -> TypeRef {
        types::ANY.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn iter_next(self: Arc<Self>, caller: Cont) {
        let index = self.index + 1;
        if index >= self.list.items.len() {
            return engine::resume(caller, Value::Nil);
        }
        let next = ListIter {
            list: Arc::clone(&self.list),
            index,
        };
        engine::resume(caller, Value::object(Arc::new(next)));
    }

    fn iter_key(self: Arc<Self>, caller: Cont) {
        let key = i64::try_from(self.index + 1).unwrap_or(i64::MAX);
        engine::resume(caller, Value::Int(key));
    }

    fn iter_value(self: Arc<Self>, caller: Cont) {
        engine::resume(caller, self.list.items[self.index].clone());
    }
}

/// A sequence over `items` with one-based integer keys.
pub(crate) fn list(items: Vec<Value>) -> Value {
    Value::object(Arc::new(List { items }))
}

/// A sequence of the integers `1..=n`.
pub(crate) fn range(n: i64) -> Value {
    list((1..=n).map(Value::Int).collect())
}

/// Drains an iterable into `(key, value)` pairs with a blocking simple call.
pub(crate) fn collect(context: &Context, sequence: &Value) -> Result<Vec<(Value, Value)>, Value> {
    fn walk(caller: Cont, iter: Value, mut acc: Vec<(Value, Value)>) {
        if iter.is_nil() || iter.is_error() {
            let result = if iter.is_error() {
                iter
            } else {
                Value::object(Arc::new(Collected(Mutex::new(acc))))
            };
            return engine::resume(caller, result);
        }
        let it = iter.clone();
        engine::iter_key(
            engine::then(caller, move |caller, key| {
                let it2 = it.clone();
                engine::iter_value(
                    engine::then(caller, move |caller, value| {
                        if value.is_error() {
                            return engine::resume(caller, value);
                        }
                        acc.push((key, value));
                        engine::iter_next(
                            engine::then(caller, move |caller, next| walk(caller, next, acc)),
                            &it2,
                        );
                    }),
                    &it,
                );
            }),
            &iter,
        );
    }

    let sequence = sequence.clone();
    let driver = Value::function_x(move |caller, _| {
        engine::iterate(
            engine::then(caller, |caller, iter| walk(caller, iter, Vec::new())),
            &sequence,
        );
    });
    let result = engine::simple_call(context, &driver, Vec::new());
    match result.downcast::<Collected>() {
        Some(collected) => Ok(core::mem::take(&mut *collected.0.lock())),
        None => Err(result),
    }
}

#[derive(Debug)]
struct Collected(Mutex<Vec<(Value, Value)>>);

impl Object for Collected {
    fn type_of(&self) -> TypeRef {
        types::ANY.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
