// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Continuations and the call/resume entry points.
//!
//! A continuation ([`Cont`]) is a boxed [`Step`]: something that can be resumed once with a
//! value, knows its context, and optionally links to the continuation it will eventually resume
//! (its caller). Ownership enforces single resumption; dropping a continuation without resuming
//! it abandons that chain.
//!
//! [`call`] hands a continuation to a callable; the result arrives later through
//! [`Step::resume`]. [`resume`] continues a chain inline (through the per-thread trampoline) unless
//! the context's preemption flag asks for a deferral, and [`schedule`] always goes through the
//! context's scheduler. Errors are ordinary values; as an error passes through a continuation
//! with source information, that location is appended to the error's trace.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::context::{Context, PREEMPTION};
use crate::error::{ErrorKind, Source};
use crate::trampoline;
use crate::value::Value;

/// A resumable unit of suspended computation.
pub trait Step: Send + 'static {
    /// Returns the context this continuation runs under.
    fn context(&self) -> &Context;

    /// Resumes the continuation with `value`.
    fn resume(self: Box<Self>, value: Value);

    /// Returns the continuation this one will resume when it finishes, if it keeps one.
    fn caller(&self) -> Option<&dyn Step> {
        None
    }

    /// Returns the source location this continuation represents, if known.
    fn source(&self) -> Option<Source> {
        None
    }

    /// Returns `true` if this continuation carries debug information.
    fn check(&self) -> bool {
        false
    }

    /// Configures stepping for a debugger paused at this continuation.
    fn step_mode(&mut self, _step_over: bool, _step_out: bool) {}

    /// Returns a local variable for a debugger.
    fn local(&self, _index: usize) -> Option<Value> {
        None
    }
}

/// An owned continuation.
pub type Cont = Box<dyn Step>;

impl fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("source", &self.source())
            .field("context", self.context())
            .finish_non_exhaustive()
    }
}

/// Calls `function` with `args`, eventually resuming `caller` with the result.
pub fn call(caller: Cont, function: &Value, args: Vec<Value>) {
    let target = function.deref();
    trampoline::enter(move || match target {
        Value::Object(object) => object.call(caller, args),
        Value::Error(_) => resume(caller, target),
        other => {
            let message = format!("<{}> is not callable", other.type_of());
            resume(caller, Value::error(ErrorKind::Type, message));
        }
    });
}

/// Resumes `state` with `value`, inline unless the context asks for preemption.
pub fn resume(state: Cont, mut value: Value) {
    annotate(&*state, &mut value);
    if value.is_error()
        && let Some(debugger) = state.context().debugger().cloned()
        && debugger.break_on_error()
        && state.check()
    {
        return debugger.pause(state, value);
    }
    let deferred = {
        let context = state.context();
        match context.get(&PREEMPTION) {
            Some(preemption) if preemption.tick() => context.scheduler().cloned(),
            _ => None,
        }
    };
    match deferred {
        Some(scheduler) => scheduler.add(state, value),
        None => trampoline::push(state, value),
    }
}

/// Hands `state` to its context's scheduler, or to the inline trampoline when none is installed.
pub fn schedule(state: Cont, mut value: Value) {
    annotate(&*state, &mut value);
    match state.context().scheduler().cloned() {
        Some(scheduler) => scheduler.add(state, value),
        None => trampoline::push(state, value),
    }
}

fn annotate(state: &dyn Step, value: &mut Value) {
    if let Value::Error(err) = value
        && let Some(source) = state.source()
    {
        Arc::make_mut(err).push_trace(source);
    }
}

const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Completion {
    value: Mutex<Option<Value>>,
    ready: Condvar,
}

impl Completion {
    fn set(&self, value: Value) {
        *self.value.lock() = Some(value);
        self.ready.notify_all();
    }

    fn take(&self) -> Option<Value> {
        self.value.lock().take()
    }

    fn wait_for(&self, timeout: Duration) {
        let mut value = self.value.lock();
        if value.is_none() {
            self.ready.wait_for(&mut value, timeout);
        }
    }
}

struct Terminal {
    context: Context,
    completion: Arc<Completion>,
}

impl Step for Terminal {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        self.completion.set(value);
    }
}

/// Calls `function` and blocks until its result is available.
///
/// Work deferred to the context's scheduler is drained on this thread with
/// [`Scheduler::run_one`](crate::scheduler::Scheduler::run_one); with a threaded scheduler the call
/// also waits for workers to finish it. If the call parks with nothing left to run, a `StateError`
/// is returned instead of blocking forever.
pub fn simple_call(context: &Context, function: &Value, args: Vec<Value>) -> Value {
    let completion = Arc::new(Completion::default());
    let terminal = Box::new(Terminal {
        context: context.clone(),
        completion: Arc::clone(&completion),
    });
    trampoline::drive(|| call(terminal, function, args));
    loop {
        if let Some(value) = completion.take() {
            return value;
        }
        let Some(scheduler) = context.scheduler() else {
            break;
        };
        if scheduler.run_one() {
            continue;
        }
        if scheduler.is_threaded() {
            completion.wait_for(IDLE_POLL);
            continue;
        }
        break;
    }
    Value::error(ErrorKind::State, "call suspended without completing")
}

struct Discard {
    context: Context,
}

impl Step for Discard {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        if let Some(err) = value.as_error() {
            tracing::debug!(kind = err.kind(), message = err.message(), "discarded error");
        }
    }
}

/// A continuation that ignores the value it is resumed with.
#[must_use]
pub fn discard(context: &Context) -> Cont {
    Box::new(Discard {
        context: context.clone(),
    })
}

struct FnStep<F> {
    context: Context,
    f: F,
}

impl<F> Step for FnStep<F>
where
    F: FnOnce(Value) + Send + 'static,
{
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        (self.f)(value);
    }
}

/// A continuation running `f` with the value it is resumed with.
#[must_use]
pub fn step<F>(context: &Context, f: F) -> Cont
where
    F: FnOnce(Value) + Send + 'static,
{
    Box::new(FnStep {
        context: context.clone(),
        f,
    })
}

struct Then<F> {
    context: Context,
    caller: Cont,
    f: F,
}

impl<F> Step for Then<F>
where
    F: FnOnce(Cont, Value) + Send + 'static,
{
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        let Self { caller, f, .. } = *self;
        f(caller, value);
    }

    fn caller(&self) -> Option<&dyn Step> {
        Some(&*self.caller)
    }
}

/// A continuation that runs `f` with `caller` and the resumed value.
///
/// `f` owns `caller` and must resume it (or hand it on).
#[must_use]
pub fn then<F>(caller: Cont, f: F) -> Cont
where
    F: FnOnce(Cont, Value) + Send + 'static,
{
    Box::new(Then {
        context: caller.context().clone(),
        caller,
        f,
    })
}

struct Scoped {
    context: Context,
    caller: Cont,
}

impl Step for Scoped {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        resume(self.caller, value);
    }

    fn caller(&self) -> Option<&dyn Step> {
        Some(&*self.caller)
    }
}

/// A continuation running under `context` that passes its value straight to `caller`.
#[must_use]
pub fn scoped(caller: Cont, context: Context) -> Cont {
    Box::new(Scoped { context, caller })
}

/// Starts iterating `sequence`, resuming `caller` with an iterator or `nil`.
pub fn iterate(caller: Cont, sequence: &Value) {
    match sequence.deref() {
        Value::Object(object) => trampoline::enter(move || object.iterate(caller)),
        Value::Error(err) => resume(caller, Value::Error(err)),
        other => {
            let message = format!("<{}> is not iterable", other.type_of());
            resume(caller, Value::error(ErrorKind::Type, message));
        }
    }
}

macro_rules! iterator_entry {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub fn $name(caller: Cont, iterator: &Value) {
            match iterator {
                Value::Object(object) => {
                    let object = Arc::clone(object);
                    trampoline::enter(move || object.$name(caller));
                }
                Value::Error(_) => resume(caller, iterator.clone()),
                other => {
                    let message = format!("<{}> is not an iterator", other.type_of());
                    resume(caller, Value::error(ErrorKind::Type, message));
                }
            }
        }
    };
}

iterator_entry!(
    /// Advances `iterator`, resuming `caller` with the next iterator or `nil`.
    iter_next
);
iterator_entry!(
    /// Resumes `caller` with the key at `iterator`.
    iter_key
);
iterator_entry!(
    /// Resumes `caller` with the value at `iterator`.
    iter_value
);
