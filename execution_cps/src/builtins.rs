// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive methods reachable through dispatch.
//!
//! [`install`] registers constructors (`semaphore`, `condition`, `rwlock`, `channel`, `task`,
//! `task-queue`) and the operations on them under their interned method names, so a host's
//! scripts use the same dispatcher for primitives as for their own definitions.

use std::sync::Arc;

use crate::context::Context;
use crate::engine::{self, Cont};
use crate::error::{ErrorKind, ErrorValue, Result};
use crate::method::{Method, MethodTable};
use crate::sync::{Channel, Condition, RwLock, Semaphore};
use crate::task::{self, FanOut, Task, TaskQueue};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

fn define<F>(table: &MethodTable, name: &str, params: &[&TypeRef], variadic: bool, body: F)
where
    F: Fn(Cont, Vec<Value>) + Send + Sync + 'static,
{
    let params = params.iter().map(|t| Arc::clone(*t)).collect();
    table.define(&Method::named(name), params, variadic, Value::function_x(body));
}

/// Runs `f` with the first argument downcast to `T`.
fn receiver<T: Object>(caller: Cont, args: &[Value], f: impl FnOnce(Cont, Arc<T>)) {
    match args.first().and_then(Value::downcast::<T>) {
        Some(object) => f(caller, object),
        None => engine::resume(caller, Value::error(ErrorKind::Type, "unexpected receiver")),
    }
}

fn outcome(result: Result<()>) -> Value {
    match result {
        Ok(()) => Value::Nil,
        Err(err) => err.into(),
    }
}

fn size_arg(value: &Value) -> usize {
    value
        .as_int()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

/// Registers the primitive methods in `table`.
pub fn install(table: &MethodTable) {
    let any = &*types::ANY;
    let integer = &*types::INTEGER;
    let function = &*types::FUNCTION;
    let semaphore = &*types::SEMAPHORE;
    let condition = &*types::CONDITION;
    let rwlock = &*types::RWLOCK;
    let channel = &*types::CHANNEL;
    let task_type = &*types::TASK;

    install_constructors(table, integer);

    define(table, "wait", &[semaphore], false, |caller, args| {
        receiver(caller, &args, |caller, sem: Arc<Semaphore>| sem.wait(caller));
    });
    define(table, "wait", &[condition, semaphore], false, |caller, args| {
        let sem = args.get(1).and_then(Value::downcast::<Semaphore>);
        receiver(caller, &args, move |caller, cond: Arc<Condition>| match sem {
            Some(sem) => cond.wait(caller, &sem),
            None => engine::resume(caller, Value::error(ErrorKind::Type, "expected a semaphore")),
        });
    });
    define(table, "wait", &[task_type], false, |caller, args| {
        receiver(caller, &args, |caller, task: Arc<Task>| task.wait(caller));
    });
    define(table, "signal", &[semaphore], false, |caller, args| {
        receiver(caller, &args, |caller, sem: Arc<Semaphore>| {
            let value = sem.signal();
            engine::resume(caller, Value::Int(value));
        });
    });
    define(table, "signal", &[condition], false, |caller, args| {
        receiver(caller, &args, |caller, cond: Arc<Condition>| {
            let woke = cond.signal();
            engine::resume(caller, Value::Bool(woke));
        });
    });
    define(table, "broadcast", &[condition], false, |caller, args| {
        receiver(caller, &args, |caller, cond: Arc<Condition>| {
            let count = cond.broadcast();
            engine::resume(caller, Value::Int(i64::try_from(count).unwrap_or(i64::MAX)));
        });
    });
    define(table, "value", &[semaphore], false, |caller, args| {
        receiver(caller, &args, |caller, sem: Arc<Semaphore>| {
            engine::resume(caller, Value::Int(sem.value()));
        });
    });
    define(table, "value", &[task_type], false, |caller, args| {
        receiver(caller, &args, |caller, task: Arc<Task>| {
            engine::resume(caller, task.value().unwrap_or(Value::Nil));
        });
    });

    define(table, "rdlock", &[rwlock], false, |caller, args| {
        receiver(caller, &args, |caller, lock: Arc<RwLock>| lock.rdlock(caller));
    });
    define(table, "wrlock", &[rwlock], false, |caller, args| {
        receiver(caller, &args, |caller, lock: Arc<RwLock>| lock.wrlock(caller));
    });
    define(table, "unlock", &[rwlock], false, |caller, args| {
        receiver(caller, &args, |caller, lock: Arc<RwLock>| {
            engine::resume(caller, outcome(lock.unlock()));
        });
    });

    install_channel(table, any, function, channel);
    install_tasks(table, any, integer, function, task_type);
}

fn install_constructors(table: &MethodTable, integer: &TypeRef) {
    define(table, "semaphore", &[], false, |caller, _| {
        engine::resume(caller, Value::object(Semaphore::new(1)));
    });
    define(table, "semaphore", &[integer], false, |caller, args| {
        let value = args[0].as_int().unwrap_or(0);
        engine::resume(caller, Value::object(Semaphore::new(value)));
    });
    define(table, "condition", &[], false, |caller, _| {
        engine::resume(caller, Value::object(Condition::new()));
    });
    define(table, "rwlock", &[], false, |caller, _| {
        engine::resume(caller, Value::object(RwLock::new()));
    });
    define(table, "channel", &[], false, |caller, _| {
        engine::resume(caller, Value::object(Channel::new()));
    });
    define(table, "task", &[], false, |caller, _| {
        engine::resume(caller, Value::object(Task::new()));
    });
    define(table, "task-queue", &[integer], false, |caller, args| {
        let result = TaskQueue::new(caller.context(), size_arg(&args[0]));
        let value = match result {
            Ok(queue) => Value::object(queue),
            Err(err) => err.into(),
        };
        engine::resume(caller, value);
    });
}

fn install_channel(table: &MethodTable, any: &TypeRef, function: &TypeRef, channel: &TypeRef) {
    define(table, "start", &[channel, function], true, |caller, mut args| {
        let rest = args.split_off(2);
        let generator = args.pop().unwrap_or(Value::Nil);
        receiver(caller, &args, move |caller, chan: Arc<Channel>| {
            chan.start(caller, &generator, rest);
        });
    });
    define(table, "send", &[channel, any], false, |caller, args| {
        let value = args[1].clone();
        receiver(caller, &args, move |caller, chan: Arc<Channel>| chan.send(caller, value));
    });
    define(table, "next", &[channel], true, |caller, args| {
        let reply = args.get(1).cloned().unwrap_or(Value::Nil);
        receiver(caller, &args, move |caller, chan: Arc<Channel>| chan.next(caller, reply));
    });
    define(table, "open", &[channel], false, |caller, args| {
        receiver(caller, &args, |caller, chan: Arc<Channel>| {
            engine::resume(caller, Value::Bool(chan.is_open()));
        });
    });
    define(table, "close", &[channel], true, |caller, args| {
        let last = args.get(1).cloned().unwrap_or(Value::Nil);
        receiver(caller, &args, move |caller, chan: Arc<Channel>| {
            engine::resume(caller, outcome(chan.close(last)));
        });
    });
}

fn install_tasks(
    table: &MethodTable,
    any: &TypeRef,
    integer: &TypeRef,
    function: &TypeRef,
    task_type: &TypeRef,
) {
    define(table, "done", &[task_type, any], false, |caller, args| {
        let value = args[1].clone();
        receiver(caller, &args, move |caller, task: Arc<Task>| {
            engine::resume(caller, outcome(task.done(value)));
        });
    });
    define(table, "error", &[task_type, any], false, |caller, args| {
        let error = match &args[1] {
            Value::Error(err) => ErrorValue::clone(err),
            Value::Str(message) => ErrorValue::new("Error", message.to_string()),
            other => ErrorValue::new("Error", format!("{other:?}")),
        };
        receiver(caller, &args, move |caller, task: Arc<Task>| {
            engine::resume(caller, outcome(task.error(error)));
        });
    });
    define(table, "then", &[task_type, function], false, |caller, args| {
        let function = args[1].clone();
        receiver(caller, &args, move |caller, task: Arc<Task>| {
            let next = task.then(caller.context(), function);
            engine::resume(caller, Value::object(next));
        });
    });
    define(table, "all", &[], true, |caller, args| {
        task_set(caller, &args, task::all);
    });
    define(table, "any", &[], true, |caller, args| {
        task_set(caller, &args, task::any);
    });

    define(table, "parallel", &[any, function], false, |caller, args| {
        task::parallel(caller, &args[0], FanOut::new(usize::MAX), args[1].clone());
    });
    define(table, "parallel", &[any, integer, function], false, |caller, args| {
        let limits = FanOut::new(size_arg(&args[1]));
        task::parallel(caller, &args[0], limits, args[2].clone());
    });
    define(
        table,
        "parallel",
        &[any, integer, integer, function],
        false,
        |caller, args| {
            let limits = FanOut::new(size_arg(&args[1])).with_min(size_arg(&args[2]));
            task::parallel(caller, &args[0], limits, args[3].clone());
        },
    );
    define(table, "buffered", &[any, integer, function], false, |caller, args| {
        let stream = task::buffered(&args[0], size_arg(&args[1]), &args[2]);
        engine::resume(caller, stream.unwrap_or_else(Value::from));
    });
    define(table, "diffused", &[any, integer, function], false, |caller, args| {
        let stream = task::diffused(&args[0], size_arg(&args[1]), &args[2]);
        engine::resume(caller, stream.unwrap_or_else(Value::from));
    });
}

fn task_set(
    caller: Cont,
    args: &[Value],
    combine: fn(&Context, &[Arc<Task>]) -> Arc<Task>,
) {
    let tasks: Option<Vec<Arc<Task>>> = args.iter().map(Value::downcast::<Task>).collect();
    let value = match tasks {
        Some(tasks) => Value::object(combine(caller.context(), &tasks)),
        None => Value::error(ErrorKind::Type, "task sets take tasks"),
    };
    engine::resume(caller, value);
}
