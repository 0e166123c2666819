// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Task;
use crate::context::Context;
use crate::engine::{self, Cont};
use crate::error::{EngineError, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

struct Job {
    function: Value,
    args: Vec<Value>,
    task: Arc<Task>,
}

#[derive(Default)]
struct State {
    running: usize,
    pending: VecDeque<Job>,
    drained: Option<Value>,
}

/// Runs submitted calls with at most `max_running` in flight.
///
/// Each submission returns a task resolved with the call's result. When a running call finishes
/// the oldest pending call starts; when nothing is running or pending any more, the drained
/// callback (if set) is called.
pub struct TaskQueue {
    context: Context,
    max_running: usize,
    state: Mutex<State>,
}

impl TaskQueue {
    /// Creates a queue running calls under `context`.
    pub fn new(context: &Context, max_running: usize) -> Result<Arc<Self>> {
        if max_running == 0 {
            return Err(EngineError::OutOfRange {
                what: "Task queue limit",
            });
        }
        Ok(Arc::new(Self {
            context: context.clone(),
            max_running,
            state: Mutex::new(State::default()),
        }))
    }

    /// Submits `function(args)`, starting it now if a slot is free.
    pub fn submit(self: &Arc<Self>, function: Value, args: Vec<Value>) -> Arc<Task> {
        let task = Task::new();
        let job = Job {
            function,
            args,
            task: Arc::clone(&task),
        };
        let start = {
            let mut state = self.state.lock();
            if state.running < self.max_running {
                state.running += 1;
                Some(job)
            } else {
                state.pending.push_back(job);
                None
            }
        };
        if let Some(job) = start {
            self.start(job);
        }
        task
    }

    /// Sets the callback called each time the queue drains.
    pub fn on_drained(&self, callback: Value) {
        self.state.lock().drained = Some(callback);
    }

    /// Returns `(running, pending)` counts.
    #[must_use]
    pub fn load(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.running, state.pending.len())
    }

    fn start(self: &Arc<Self>, job: Job) {
        let queue = Arc::clone(self);
        let Job {
            function,
            args,
            task,
        } = job;
        let finish = engine::step(&self.context, move |value| {
            task.try_done(value);
            queue.finished();
        });
        engine::call(finish, &function, args);
    }

    fn finished(self: &Arc<Self>) {
        let (next, drained) = {
            let mut state = self.state.lock();
            match state.pending.pop_front() {
                Some(job) => (Some(job), None),
                None => {
                    state.running -= 1;
                    let drained = if state.running == 0 {
                        state.drained.clone()
                    } else {
                        None
                    };
                    (None, drained)
                }
            }
        };
        if let Some(job) = next {
            self.start(job);
        } else if let Some(callback) = drained {
            tracing::trace!("task queue drained");
            engine::call(engine::discard(&self.context), &callback, Vec::new());
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (running, pending) = self.load();
        f.debug_struct("TaskQueue")
            .field("max_running", &self.max_running)
            .field("running", &running)
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

impl Object for TaskQueue {
    fn type_of(&self) -> TypeRef {
        types::TASK_QUEUE.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    /// `queue(function, args...)` submits a call and returns its task.
    fn call(self: Arc<Self>, caller: Cont, mut args: Vec<Value>) {
        if args.is_empty() {
            let err = Value::error(crate::error::ErrorKind::Type, "task queue needs a function");
            return engine::resume(caller, err);
        }
        let rest = args.split_off(1);
        let function = args.pop().unwrap_or(Value::Nil);
        let task = self.submit(function, rest);
        engine::resume(caller, Value::object(task));
    }
}
