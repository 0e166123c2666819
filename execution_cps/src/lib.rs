// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Continuation-passing execution core for a dynamic scripting language.
//!
//! Every call takes an explicit continuation ([`Cont`]) to resume with its result, so nothing in
//! the engine ever blocks a native thread waiting for script code. On top of that sit:
//!
//! - [`Context`]: slot vectors inherited along a call chain, carrying the scheduler, method table,
//!   debugger and preemption state.
//! - [`scheduler`] and [`queue`]: inline and queued scheduling, a worker pool, and preemption.
//! - [`method`]: multiple dispatch over argument types with per-table resolution caches.
//! - [`coroutine`]: plain nested code that can suspend on CPS calls.
//! - [`sync`] and [`task`]: semaphores, conditions, read/write locks, channels, futures, task
//!   queues and fan-out combinators, all suspending continuations rather than threads.
//!
//! ## Example
//! ```no_run
//! use execution_cps::{Context, Method, Value, builtins, engine};
//!
//! let context = Context::root();
//! builtins::install(context.methods().expect("root table"));
//! let sem = engine::simple_call(&context, &Value::object(Method::named("semaphore")), vec![]);
//! ```
//!
//! Failures that reach script code are values ([`ErrorValue`]); host-facing failures are
//! [`EngineError`].

pub mod builtins;
pub mod config;
pub mod context;
pub mod coroutine;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod method;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod trace;
pub mod types;
pub mod value;

mod trampoline;

#[cfg(test)]
mod test_support;

pub use context::{Context, ContextKey, ContextVar};
pub use engine::{Cont, Step};
pub use error::{EngineError, ErrorKind, ErrorValue, Source};
pub use method::{Definition, Method, MethodRef, MethodTable};
pub use queue::{Queue, QueueConfig};
pub use scheduler::{InlineScheduler, Preemption, Scheduler, SchedulerRef};
pub use types::{Type, TypeRef};
pub use value::{Object, Value};
