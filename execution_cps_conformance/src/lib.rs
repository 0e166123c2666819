// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance and regression helpers for `execution_cps`.
//!
//! This crate hosts cross-module tests in `tests/` and a few fixtures they share: a
//! value-capturing continuation, a list-backed sequence, and a small type lattice for dispatch
//! properties.

use core::any::Any;
use std::sync::Arc;

use execution_cps::types::{self, Type, TypeRef};
use execution_cps::{Cont, Context, Object, Value, engine};
use parking_lot::Mutex;

/// A continuation factory that records every value it is resumed with.
#[derive(Clone, Debug)]
pub struct Capture {
    context: Context,
    values: Arc<Mutex<Vec<Value>>>,
}

impl Capture {
    /// Creates a capture whose continuations run under `context`.
    #[must_use]
    pub fn new(context: &Context) -> Self {
        Self {
            context: context.clone(),
            values: Arc::default(),
        }
    }

    /// Returns a fresh continuation recording into this capture.
    #[must_use]
    pub fn cont(&self) -> Cont {
        let values = Arc::clone(&self.values);
        engine::step(&self.context, move |value| values.lock().push(value))
    }

    /// Removes and returns the oldest recorded value.
    #[must_use]
    pub fn take(&self) -> Option<Value> {
        let mut values = self.values.lock();
        (!values.is_empty()).then(|| values.remove(0))
    }

    /// Number of values recorded and not yet taken.
    #[must_use]
    pub fn count(&self) -> usize {
        self.values.lock().len()
    }
}

#[derive(Debug)]
struct List {
    items: Vec<Value>,
}

#[derive(Debug)]
struct Cursor {
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
        let cursor = Cursor {
            list: self,
            index: 0,
        };
        engine::resume(caller, Value::object(Arc::new(cursor)));
    }
}

impl Object for Cursor {
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
        let next = Cursor {
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
#[must_use]
pub fn list(items: Vec<Value>) -> Value {
    Value::object(Arc::new(List { items }))
}

/// A sequence of the integers `1..=n`.
#[must_use]
pub fn range(n: i64) -> Value {
    list((1..=n).map(Value::Int).collect())
}

/// A small diamond-shaped type lattice: `any > {left, right} > both`, plus an unrelated `leaf`
/// under `left`.
#[must_use]
pub fn lattice() -> Vec<TypeRef> {
    let left = Type::new("left", &[]);
    let right = Type::new("right", &[]);
    let both = Type::new("both", &[Arc::clone(&left), Arc::clone(&right)]);
    let leaf = Type::new("leaf", &[Arc::clone(&left)]);
    vec![types::ANY.clone(), left, right, both, leaf]
}
