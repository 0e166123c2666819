// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Coroutine bridge: ordinary nested code running as one continuation.
//!
//! A coroutine body runs on a dedicated native stack (a parked OS thread taken from a
//! [`StackPool`]) with plain call/return semantics. When the body needs a CPS call it performs a
//! *yield call* ([`Yielder::call`] or [`yield_call`]): control transfers back to the engine side,
//! which issues an ordinary [`engine::call`] and, once that call resumes, hands the value back down
//! to the body at the yield point. Exactly one side runs at any instant; the other is blocked in
//! the handoff.
//!
//! When the body returns, its stack goes back to the free list of the native thread that observed
//! the return. Dropping a continuation parked on a yield call abandons the coroutine: the pending
//! yield call fails with [`EngineError::Abandoned`] and the stack is retired once the body returns.

use core::any::Any;
use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::context::{Context, ContextKey};
use crate::engine::{self, Cont, Step};
use crate::error::{EngineError, ErrorKind, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

/// Coroutine stack settings.
#[derive(Clone, Debug)]
pub struct CoroutineConfig {
    /// Native stack size of each coroutine thread.
    pub stack_size: usize,
    /// Maximum live stacks across all threads; 0 means unbounded.
    pub max_stacks: usize,
    /// Maximum idle stacks kept per native thread.
    pub max_idle_per_thread: usize,
}

impl Default for CoroutineConfig {
    fn default() -> Self {
        Self {
            stack_size: 1 << 20,
            max_stacks: 0,
            max_idle_per_thread: 8,
        }
    }
}

/// Body of a coroutine.
pub type CoBody = dyn Fn(&Yielder, Vec<Value>) -> Value + Send + Sync;

enum Down {
    Start {
        body: Arc<CoBody>,
        args: Vec<Value>,
    },
    Resume(Value),
    Abandon,
    Exit,
}

enum Up {
    Yield { function: Value, args: Vec<Value> },
    Return(Value),
}

struct Handoff<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Handoff<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        })
    }

    fn put(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    fn take(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.ready.wait(&mut items);
        }
    }
}

struct Link {
    down: Arc<Handoff<Down>>,
    up: Arc<Handoff<Up>>,
    abandoned: AtomicBool,
}

impl Link {
    fn call(&self, function: Value, args: Vec<Value>) -> Result<Value> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(EngineError::Abandoned);
        }
        self.up.put(Up::Yield { function, args });
        loop {
            match self.down.take() {
                Down::Resume(value) => return Ok(value),
                Down::Abandon => {
                    self.abandoned.store(true, Ordering::Release);
                    return Err(EngineError::Abandoned);
                }
                Down::Exit => {
                    // Leave the exit for the stack loop once the body unwinds.
                    self.down.put(Down::Exit);
                    self.abandoned.store(true, Ordering::Release);
                    return Err(EngineError::Abandoned);
                }
                Down::Start { .. } => {
                    tracing::warn!("coroutine received a start message mid-call");
                }
            }
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Link>>> = const { RefCell::new(None) };
}

/// Handle a coroutine body uses to make yield calls.
///
/// Only valid on the coroutine's own stack.
pub struct Yielder {
    link: Arc<Link>,
    marker: PhantomData<*const ()>,
}

impl Yielder {
    /// Calls `function` through the engine and returns its result.
    pub fn call(&self, function: &Value, args: Vec<Value>) -> Result<Value> {
        self.link.call(function.clone(), args)
    }

    /// Returns `true` once the engine side has given up on this coroutine.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.link.abandoned.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Yielder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Makes a yield call from code running on a coroutine stack.
///
/// Fails with [`EngineError::NotInCoroutine`] anywhere else.
pub fn yield_call(function: &Value, args: Vec<Value>) -> Result<Value> {
    let link = CURRENT.with_borrow(Clone::clone).ok_or(EngineError::NotInCoroutine)?;
    link.call(function.clone(), args)
}

/// Returns `true` if the current native thread is a coroutine stack running a body.
#[must_use]
pub fn in_coroutine() -> bool {
    CURRENT.with_borrow(Option::is_some)
}

fn stack_main(link: Arc<Link>) {
    loop {
        match link.down.take() {
            Down::Start { body, args } => {
                link.abandoned.store(false, Ordering::Release);
                CURRENT.set(Some(Arc::clone(&link)));
                let yielder = Yielder {
                    link: Arc::clone(&link),
                    marker: PhantomData,
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&yielder, args)));
                CURRENT.set(None);
                let value = outcome.unwrap_or_else(|_| {
                    Value::error(ErrorKind::State, "coroutine body panicked")
                });
                if yielder.is_abandoned() {
                    tracing::debug!("abandoned coroutine finished");
                } else {
                    link.up.put(Up::Return(value));
                }
            }
            Down::Exit => break,
            Down::Resume(_) | Down::Abandon => {}
        }
    }
}

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

struct CoStack {
    id: u64,
    link: Arc<Link>,
    live: Arc<AtomicUsize>,
}

impl CoStack {
    fn spawn(config: &CoroutineConfig, live: &Arc<AtomicUsize>) -> Result<Self> {
        let id = NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(Link {
            down: Handoff::new(),
            up: Handoff::new(),
            abandoned: AtomicBool::new(false),
        });
        let stack_link = Arc::clone(&link);
        // Detached: the thread exits after `Exit`, which `Drop` always sends.
        thread::Builder::new()
            .name(format!("cps-coroutine-{id}"))
            .stack_size(config.stack_size)
            .spawn(move || stack_main(stack_link))
            .map_err(EngineError::StackSpawn)?;
        live.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(stack = id, size = config.stack_size, "coroutine stack allocated");
        Ok(Self {
            id,
            link,
            live: Arc::clone(live),
        })
    }
}

impl Drop for CoStack {
    fn drop(&mut self) {
        self.link.down.put(Down::Exit);
        self.live.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(stack = self.id, "coroutine stack retired");
    }
}

/// Pool counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Stacks alive, idle or running.
    pub live: usize,
    /// Idle stacks on the current native thread.
    pub idle_here: usize,
}

/// Reusable coroutine stacks with per-thread free lists.
pub struct StackPool {
    config: CoroutineConfig,
    free: Mutex<HashMap<ThreadId, Vec<CoStack>>>,
    live: Arc<AtomicUsize>,
}

/// Context slot selecting the stack pool for coroutines started under it.
pub static STACK_POOL: LazyLock<ContextKey<Arc<StackPool>>> = LazyLock::new(ContextKey::reserve);

static DEFAULT_POOL: LazyLock<Arc<StackPool>> =
    LazyLock::new(|| StackPool::new(CoroutineConfig::default()));

impl StackPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: CoroutineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            free: Mutex::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the pool installed in `context`, or the process-wide default.
    #[must_use]
    pub fn of(context: &Context) -> Arc<Self> {
        context
            .get(&*STACK_POOL)
            .map_or_else(|| Arc::clone(&DEFAULT_POOL), Arc::clone)
    }

    /// Returns a child of `context` using this pool.
    #[must_use]
    pub fn install(self: &Arc<Self>, context: &Context) -> Context {
        context.with(&*STACK_POOL, Arc::clone(self))
    }

    /// Returns the pool's counters as seen from the current thread.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle_here = self
            .free
            .lock()
            .get(&thread::current().id())
            .map_or(0, Vec::len);
        PoolStats {
            live: self.live.load(Ordering::Acquire),
            idle_here,
        }
    }

    /// Takes an idle stack, preferring the current thread's, or spawns one within the limit.
    ///
    /// Idle stacks filed by other threads are taken too; a thread that has exited never comes
    /// back for its own.
    fn acquire(&self) -> Result<CoStack> {
        let me = thread::current().id();
        {
            let mut free = self.free.lock();
            let idle = match free.get_mut(&me).and_then(Vec::pop) {
                Some(stack) => Some(stack),
                None => free.values_mut().find_map(Vec::pop),
            };
            free.retain(|_, list| !list.is_empty());
            if let Some(stack) = idle {
                return Ok(stack);
            }
        }
        let limit = self.config.max_stacks;
        if limit != 0 && self.live.load(Ordering::Acquire) >= limit {
            return Err(EngineError::StackLimit { limit });
        }
        CoStack::spawn(&self.config, &self.live)
    }

    fn release(&self, stack: CoStack) {
        let me = thread::current().id();
        let mut free = self.free.lock();
        let list = free.entry(me).or_default();
        if list.len() < self.config.max_idle_per_thread {
            list.push(stack);
            return;
        }
        drop(free);
        drop(stack);
    }
}

impl fmt::Debug for StackPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackPool")
            .field("config", &self.config)
            .field("live", &self.live.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Runs `body(args)` on a coroutine stack, eventually resuming `caller` with its return value.
pub fn enter(caller: Cont, body: Arc<CoBody>, args: Vec<Value>) {
    let pool = StackPool::of(caller.context());
    let stack = match pool.acquire() {
        Ok(stack) => stack,
        Err(err) => return engine::resume(caller, err.into()),
    };
    stack.link.down.put(Down::Start { body, args });
    transfer(caller, stack, pool);
}

fn transfer(caller: Cont, stack: CoStack, pool: Arc<StackPool>) {
    match stack.link.up.take() {
        Up::Return(value) => {
            pool.release(stack);
            engine::resume(caller, value);
        }
        Up::Yield { function, args } => {
            let state = Box::new(CoroutineState {
                context: caller.context().clone(),
                caller: Some(caller),
                stack: Some(stack),
                pool,
            });
            engine::call(state, &function, args);
        }
    }
}

/// Continuation parked on a coroutine's yield call.
struct CoroutineState {
    context: Context,
    caller: Option<Cont>,
    stack: Option<CoStack>,
    pool: Arc<StackPool>,
}

impl Step for CoroutineState {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(mut self: Box<Self>, value: Value) {
        let (Some(caller), Some(stack)) = (self.caller.take(), self.stack.take()) else {
            return;
        };
        stack.link.down.put(Down::Resume(value));
        transfer(caller, stack, Arc::clone(&self.pool));
    }

    fn caller(&self) -> Option<&dyn Step> {
        self.caller.as_deref()
    }
}

impl Drop for CoroutineState {
    fn drop(&mut self) {
        if let Some(stack) = self.stack.take() {
            tracing::debug!(stack = stack.id, "coroutine abandoned");
            stack.link.down.put(Down::Abandon);
        }
    }
}

/// A callable whose body runs as a coroutine.
pub struct CoFunction {
    body: Arc<CoBody>,
}

impl fmt::Debug for CoFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoFunction").finish_non_exhaustive()
    }
}

impl Object for CoFunction {
    fn type_of(&self) -> TypeRef {
        types::COFUNCTION.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, args: Vec<Value>) {
        enter(caller, Arc::clone(&self.body), args);
    }
}

/// Wraps `body` as a callable coroutine value.
#[must_use]
pub fn cofunction<F>(body: F) -> Value
where
    F: Fn(&Yielder, Vec<Value>) -> Value + Send + Sync + 'static,
{
    Value::object(Arc::new(CoFunction {
        body: Arc::new(body),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Queue, QueueConfig};
    use std::sync::mpsc;
    use std::time::Duration;

    fn add() -> Value {
        Value::function(|args| Value::Int(args.iter().filter_map(Value::as_int).sum()))
    }

    #[test]
    fn returning_body_resumes_caller_and_recycles_stack() {
        let pool = StackPool::new(CoroutineConfig::default());
        let context = pool.install(&Context::root());
        let f = cofunction(|_, args| args.into_iter().next().unwrap_or(Value::Nil));
        assert_eq!(engine::simple_call(&context, &f, vec![Value::Int(9)]), Value::Int(9));
        assert_eq!(pool.stats(), PoolStats { live: 1, idle_here: 1 });
        assert_eq!(engine::simple_call(&context, &f, vec![Value::Int(4)]), Value::Int(4));
        assert_eq!(pool.stats().live, 1);
    }

    #[test]
    fn idle_stack_of_an_exited_thread_is_reused() {
        let pool = StackPool::new(CoroutineConfig {
            max_stacks: 1,
            ..CoroutineConfig::default()
        });
        let context = pool.install(&Context::root());
        let f = cofunction(|_, args| args.into_iter().next().unwrap_or(Value::Nil));
        let worker = {
            let (context, f) = (context.clone(), f.clone());
            std::thread::spawn(move || engine::simple_call(&context, &f, vec![Value::Int(1)]))
        };
        assert_eq!(worker.join().expect("worker"), Value::Int(1));
        assert_eq!(pool.stats(), PoolStats { live: 1, idle_here: 0 });
        assert_eq!(engine::simple_call(&context, &f, vec![Value::Int(2)]), Value::Int(2));
        assert_eq!(pool.stats(), PoolStats { live: 1, idle_here: 1 });
    }

    #[test]
    fn yield_calls_round_trip_through_the_engine() {
        let pool = StackPool::new(CoroutineConfig::default());
        let context = pool.install(&Context::root());
        let add = add();
        let f = cofunction(move |y, _| {
            let first = y.call(&add, vec![Value::Int(1), Value::Int(2)]);
            let second = yield_call(&add, vec![first.unwrap_or(Value::Nil), Value::Int(4)]);
            second.unwrap_or_else(Value::from)
        });
        assert_eq!(engine::simple_call(&context, &f, Vec::new()), Value::Int(7));
    }

    #[test]
    fn yield_calls_may_suspend_on_a_queue() {
        let pool = StackPool::new(CoroutineConfig::default());
        let queue = Queue::new(QueueConfig::default()).expect("queue");
        let context = pool.install(&queue.scope(&Context::root()));
        let later = Value::function_x(|caller, args| {
            let value = args.into_iter().next().unwrap_or(Value::Nil);
            engine::schedule(caller, value);
        });
        let f = cofunction(move |y, _| {
            let mut total = 0;
            for n in 1..=3 {
                total += y
                    .call(&later, vec![Value::Int(n)])
                    .ok()
                    .and_then(|v| v.as_int())
                    .unwrap_or(0);
            }
            Value::Int(total)
        });
        assert_eq!(engine::simple_call(&context, &f, Vec::new()), Value::Int(6));
    }

    #[test]
    fn yield_call_outside_a_coroutine_fails() {
        assert!(!in_coroutine());
        let err = yield_call(&Value::Nil, Vec::new()).expect_err("not on a coroutine stack");
        assert!(matches!(err, EngineError::NotInCoroutine));
        assert_eq!(err.to_string(), "Must be called from a coroutine");
    }

    #[test]
    fn dropping_the_parked_continuation_abandons_the_body() {
        let pool = StackPool::new(CoroutineConfig::default());
        let context = pool.install(&Context::root());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let park = Value::function_x(|caller, _| drop(caller));
        let f = cofunction(move |y, _| {
            let outcome = y.call(&park, Vec::new());
            let _ = tx.lock().send(matches!(outcome, Err(EngineError::Abandoned)));
            Value::Nil
        });
        let result = engine::simple_call(&context, &f, Vec::new());
        assert!(result.as_error().is_some_and(|e| e.is(ErrorKind::State)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    }

    #[test]
    fn stack_limit_is_reported_as_stack_error() {
        let pool = StackPool::new(CoroutineConfig {
            max_stacks: 1,
            ..CoroutineConfig::default()
        });
        let context = pool.install(&Context::root());
        let parked = Arc::new(Mutex::new(None::<Cont>));
        let hold = {
            let parked = Arc::clone(&parked);
            Value::function_x(move |caller, _| *parked.lock() = Some(caller))
        };
        let f = cofunction(move |y, _| y.call(&hold, Vec::new()).unwrap_or_else(Value::from));
        let first = engine::simple_call(&context, &f, Vec::new());
        assert!(first.is_error());
        assert!(parked.lock().is_some());
        let second = engine::simple_call(&context, &f, Vec::new());
        let err = second.as_error().expect("limit reached");
        assert!(err.is(ErrorKind::Stack));
        assert_eq!(err.message(), "coroutine stack limit of 1 reached");
        let resumed = parked.lock().take().expect("parked continuation");
        resumed.resume(Value::Int(5));
        assert_eq!(pool.stats(), PoolStats { live: 1, idle_here: 1 });
    }

    #[test]
    fn panicking_body_becomes_a_state_error() {
        let context = StackPool::new(CoroutineConfig::default()).install(&Context::root());
        let f = cofunction(|_, _| panic!("boom"));
        let result = engine::simple_call(&context, &f, Vec::new());
        let err = result.as_error().expect("panic surfaces as an error");
        assert_eq!(err.message(), "coroutine body panicked");
    }
}
