// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::Task;
use crate::context::Context;
use crate::engine;
use crate::types;
use crate::value::Value;

/// Returns a task resolved once every task in `tasks` has, or with the first error among them.
///
/// On success the set's value is the value of the task that completed last. An empty set
/// resolves with `nil`.
#[must_use]
pub fn all(context: &Context, tasks: &[Arc<Task>]) -> Arc<Task> {
    let set = Task::of_type(types::TASK_SET.clone());
    if tasks.is_empty() {
        set.try_done(Value::Nil);
        return set;
    }
    let remaining = Arc::new(AtomicUsize::new(tasks.len()));
    for task in tasks {
        let set = Arc::clone(&set);
        let remaining = Arc::clone(&remaining);
        task.wait(engine::step(context, move |value| {
            if value.is_error() || remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                set.try_done(value);
            }
        }));
    }
    set
}

/// Returns a task resolved with the first value or error produced by any task in `tasks`.
///
/// An empty set resolves with `nil`.
#[must_use]
pub fn any(context: &Context, tasks: &[Arc<Task>]) -> Arc<Task> {
    let set = Task::of_type(types::TASK_SET.clone());
    if tasks.is_empty() {
        set.try_done(Value::Nil);
        return set;
    }
    for task in tasks {
        let set = Arc::clone(&set);
        task.wait(engine::step(context, move |value| {
            set.try_done(value);
        }));
    }
    set
}
