// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::engine::{self, Cont};
use crate::error::{EngineError, ErrorValue, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

#[derive(Debug, Default)]
struct State {
    value: Option<Value>,
    primary: Option<Cont>,
    waiters: Vec<Cont>,
}

/// A single-assignment future.
///
/// Callers that wait before resolution are parked (the first as the primary caller, the rest as
/// waiters) and scheduled once the value arrives; callers that wait afterwards see it at once.
/// Calling a task waits on it.
pub struct Task {
    kind: TypeRef,
    state: Mutex<State>,
}

impl Task {
    /// Creates a pending task.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::of_type(types::TASK.clone())
    }

    pub(super) fn of_type(kind: TypeRef) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(State::default()),
        })
    }

    /// Creates a task resolved with `value`.
    #[must_use]
    pub fn resolved(value: Value) -> Arc<Self> {
        let task = Self::new();
        task.state.lock().value = Some(value);
        task
    }

    /// Resumes `caller` with the task's value, parking it until the task resolves.
    pub fn wait(&self, caller: Cont) {
        let ready = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => Some((caller, value.clone())),
                None => {
                    if state.primary.is_none() {
                        state.primary = Some(caller);
                    } else {
                        state.waiters.push(caller);
                    }
                    None
                }
            }
        };
        if let Some((caller, value)) = ready {
            engine::resume(caller, value);
        }
    }

    /// Resolves the task and schedules every parked caller.
    pub fn done(&self, value: Value) -> Result<()> {
        let (primary, waiters) = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return Err(EngineError::TaskAlreadySet);
            }
            state.value = Some(value.clone());
            (state.primary.take(), core::mem::take(&mut state.waiters))
        };
        for caller in primary.into_iter().chain(waiters) {
            engine::schedule(caller, value.clone());
        }
        Ok(())
    }

    /// Resolves the task with an error value.
    pub fn error(&self, error: ErrorValue) -> Result<()> {
        self.done(error.into())
    }

    /// Resolves the task unless it already is; returns `true` if this call resolved it.
    pub fn try_done(&self, value: Value) -> bool {
        self.done(value).is_ok()
    }

    /// Returns the resolved value, if any.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.state.lock().value.clone()
    }

    /// Returns `true` once the task has a value.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Returns the number of parked callers.
    #[must_use]
    pub fn waiting(&self) -> usize {
        let state = self.state.lock();
        usize::from(state.primary.is_some()) + state.waiters.len()
    }

    /// Starts `function(args)` and returns a task resolved with its result.
    #[must_use]
    pub fn spawn(context: &Context, function: &Value, args: Vec<Value>) -> Arc<Self> {
        let task = Self::new();
        engine::call(task.resolver(context), function, args);
        task
    }

    /// Returns a task resolved with `function(value)` once this task resolves with `value`.
    #[must_use]
    pub fn then(&self, context: &Context, function: Value) -> Arc<Self> {
        let next = Self::new();
        let resolver = next.resolver(context);
        self.wait(engine::step(context, move |value| {
            engine::call(resolver, &function, vec![value]);
        }));
        next
    }

    /// A continuation that resolves this task with the value it receives.
    #[must_use]
    pub fn resolver(self: &Arc<Self>, context: &Context) -> Cont {
        let task = Arc::clone(self);
        engine::step(context, move |value| {
            if task.done(value).is_err() {
                tracing::debug!("task resolved twice; later value dropped");
            }
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Task")
            .field("kind", &self.kind.name())
            .field("value", &state.value)
            .field("waiting", &(usize::from(state.primary.is_some()) + state.waiters.len()))
            .finish()
    }
}

impl Object for Task {
    fn type_of(&self) -> TypeRef {
        self.kind.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, _args: Vec<Value>) {
        self.wait(caller);
    }
}
