// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! FIFO scheduler backed by a chain of fixed-capacity blocks, with an optional worker pool.
//!
//! [`BlockQueue`] keeps a read cursor in its head block and a write cursor in its tail block. A full
//! tail gets a freshly linked block; stored items are never moved. A drained head block is unlinked
//! and kept as a spare for the next growth, and a drained single block just rewinds its cursors.
//!
//! [`Queue`] wraps a `BlockQueue` of `(continuation, value)` pairs behind a mutex and implements
//! [`Scheduler`]. With `max_workers > 0`, adding work spawns worker threads on demand; idle workers
//! wait on a condition variable, at most `max_idle_workers` of them stay parked, and the rest exit.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::context::{Context, PREEMPTION, SCHEDULER, THREAD};
use crate::engine::Cont;
use crate::error::{EngineError, Result};
use crate::scheduler::{PreemptTimer, Preemption, Scheduler, SchedulerRef};
use crate::trace;
use crate::trampoline;
use crate::value::Value;

struct Block<T> {
    slots: Box<[Option<T>]>,
    read: usize,
    write: usize,
}

impl<T> Block<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            read: 0,
            write: 0,
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.write == self.slots.len()
    }

    fn put(&mut self, item: T) {
        self.slots[self.write] = Some(item);
        self.write += 1;
    }

    fn take(&mut self) -> Option<T> {
        if self.read == self.write {
            return None;
        }
        let item = self.slots[self.read].take();
        self.read += 1;
        item
    }
}

/// FIFO of items stored in linked fixed-capacity blocks.
pub struct BlockQueue<T> {
    blocks: VecDeque<Block<T>>,
    spare: Option<Block<T>>,
    capacity: usize,
    len: usize,
}

impl<T> BlockQueue<T> {
    /// Creates an empty queue whose blocks hold `capacity` items each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            spare: None,
            capacity: capacity.max(1),
            len: 0,
        }
    }

    /// Appends an item.
    pub fn push(&mut self, item: T) {
        match self.blocks.back_mut() {
            Some(tail) if !tail.is_full() => tail.put(item),
            _ => {
                let mut block = self
                    .spare
                    .take()
                    .unwrap_or_else(|| Block::new(self.capacity));
                block.put(item);
                self.blocks.push_back(block);
                tracing::trace!(blocks = self.blocks.len(), len = self.len + 1, "queue linked block");
            }
        }
        self.len += 1;
    }

    /// Removes the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        let (item, drained, full) = {
            let head = self.blocks.front_mut()?;
            let item = head.take()?;
            (item, head.read == head.write, head.is_full())
        };
        self.len -= 1;
        if drained {
            if full || self.blocks.len() > 1 {
                if let Some(mut spent) = self.blocks.pop_front() {
                    spent.read = 0;
                    spent.write = 0;
                    self.spare.get_or_insert(spent);
                }
            } else if let Some(head) = self.blocks.front_mut() {
                head.read = 0;
                head.write = 0;
            }
        }
        Some(item)
    }

    /// Number of stored items.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of linked blocks.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl<T> fmt::Debug for BlockQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockQueue")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Queue scheduler configuration.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Items per block.
    pub block_capacity: usize,
    /// Maximum worker threads; 0 runs everything through [`Scheduler::run_one`].
    pub max_workers: usize,
    /// Maximum idle workers kept parked; extra idle workers exit.
    pub max_idle_workers: usize,
    /// Worker thread stack size, if not the platform default.
    pub worker_stack_size: Option<usize>,
    /// Cooperative preemption: yield every `time_slice` resumes.
    pub time_slice: Option<u64>,
    /// Timer-driven preemption interval.
    pub timer_interval: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            block_capacity: 256,
            max_workers: 0,
            max_idle_workers: 4,
            worker_stack_size: None,
            time_slice: None,
            timer_interval: None,
        }
    }
}

#[derive(Default)]
struct Workers {
    live: usize,
    idle: usize,
    shutdown: bool,
    handles: Vec<JoinHandle<()>>,
}

struct State {
    pending: BlockQueue<(Cont, Value)>,
    workers: Workers,
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// FIFO scheduler with optional worker threads.
pub struct Queue {
    id: u64,
    config: QueueConfig,
    state: Mutex<State>,
    ready: Condvar,
    preemption: Option<Arc<Preemption>>,
    timer: Mutex<Option<PreemptTimer>>,
    this: Weak<Self>,
}

impl Queue {
    /// Creates a queue; starts the preemption timer if one is configured.
    pub fn new(config: QueueConfig) -> Result<Arc<Self>> {
        let preemption = match (config.time_slice, config.timer_interval) {
            (Some(slice), _) => Some(Preemption::counting(slice)),
            (None, Some(_)) => Some(Preemption::manual()),
            (None, None) => None,
        };
        let timer = match (&preemption, config.timer_interval) {
            (Some(p), Some(interval)) => Some(p.start_timer(interval)?),
            _ => None,
        };
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(queue = id, ?config, "queue created");
        Ok(Arc::new_cyclic(|this| Self {
            id,
            state: Mutex::new(State {
                pending: BlockQueue::new(config.block_capacity),
                workers: Workers::default(),
            }),
            config,
            ready: Condvar::new(),
            preemption,
            timer: Mutex::new(timer),
            this: this.clone(),
        }))
    }

    /// Returns this queue's id, which doubles as the logical thread id of chains it schedules.
    #[must_use]
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns a child of `parent` whose resumes are scheduled by this queue.
    #[must_use]
    pub fn scope(self: &Arc<Self>, parent: &Context) -> Context {
        let mut context = parent.child();
        context.set_static(&SCHEDULER, Arc::clone(self) as SchedulerRef);
        context.set_static(&THREAD, self.id);
        if let Some(preemption) = &self.preemption {
            context.set_static(&PREEMPTION, Arc::clone(preemption));
        }
        context
    }

    /// Returns the queue's preemption state, if preemption is configured.
    #[must_use]
    pub fn preemption(&self) -> Option<&Arc<Preemption>> {
        self.preemption.as_ref()
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.state.lock().workers.live
    }

    /// Number of parked idle workers.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.state.lock().workers.idle
    }

    /// Stops the workers once the queue drains and waits for them to exit.
    ///
    /// Workers keep the queue alive, so a threaded queue must be shut down explicitly.
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.workers.shutdown = true;
            core::mem::take(&mut state.workers.handles)
        };
        self.ready.notify_all();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(queue = self.id, "worker panicked");
            }
        }
        drop(self.timer.lock().take());
        tracing::debug!(queue = self.id, "queue shut down");
    }

    fn spawn_worker(&self, index: usize) -> Result<()> {
        let Some(queue) = self.this.upgrade() else {
            return Ok(());
        };
        let mut builder = thread::Builder::new().name(format!("cps-worker-{}-{index}", self.id));
        if let Some(size) = self.config.worker_stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || queue.work(index))
            .map_err(EngineError::WorkerSpawn)?;
        self.state.lock().workers.handles.push(handle);
        Ok(())
    }

    fn work(&self, index: usize) {
        tracing::debug!(queue = self.id, worker = index, "worker started");
        let mut state = self.state.lock();
        loop {
            if let Some((continuation, value)) = state.pending.pop() {
                if !state.pending.is_empty() && state.workers.idle > 0 {
                    self.ready.notify_one();
                }
                MutexGuard::unlocked(&mut state, || run(continuation, value));
                continue;
            }
            if state.workers.shutdown || state.workers.idle >= self.config.max_idle_workers {
                break;
            }
            state.workers.idle += 1;
            self.ready.wait(&mut state);
            state.workers.idle -= 1;
        }
        state.workers.live -= 1;
        tracing::debug!(queue = self.id, worker = index, "worker stopped");
    }
}

fn run(continuation: Cont, value: Value) {
    let sink = trace::sink(continuation.context()).cloned();
    if let Some(sink) = &sink {
        sink.step_enter(continuation.source().as_ref());
    }
    trampoline::drive(move || continuation.resume(value));
    if let Some(sink) = &sink {
        sink.step_exit();
    }
}

impl Scheduler for Queue {
    fn add(&self, state: Cont, value: Value) {
        let sink = trace::sink(state.context()).cloned();
        let (fill, spawn) = {
            let mut guard = self.state.lock();
            guard.pending.push((state, value));
            let fill = guard.pending.len();
            let workers = &mut guard.workers;
            let spawn = if workers.idle > 0 {
                if fill == 1 {
                    self.ready.notify_one();
                }
                None
            } else if workers.live < self.config.max_workers && !workers.shutdown {
                workers.live += 1;
                Some(workers.live)
            } else {
                None
            };
            (fill, spawn)
        };
        if let Some(sink) = sink {
            sink.queue_fill(fill);
        }
        if let Some(index) = spawn
            && let Err(err) = self.spawn_worker(index)
        {
            tracing::warn!(queue = self.id, %err, "worker spawn failed");
            self.state.lock().workers.live -= 1;
        }
    }

    fn run_one(&self) -> bool {
        let next = self.state.lock().pending.pop();
        match next {
            Some((continuation, value)) => {
                run(continuation, value);
                true
            }
            None => false,
        }
    }

    fn fill(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn is_threaded(&self) -> bool {
        self.config.max_workers > 0
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("fill", &state.pending.len())
            .field("live_workers", &state.workers.live)
            .field("idle_workers", &state.workers.idle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::test_support::Capture;
    use std::time::Instant;

    #[test]
    fn block_queue_is_fifo_across_blocks() {
        let mut q = BlockQueue::new(4);
        for i in 0..10 {
            q.push(i);
        }
        assert_eq!(q.len(), 10);
        assert_eq!(q.block_count(), 3);
        let drained: Vec<i32> = core::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn block_queue_reuses_blocks_when_interleaved() {
        let mut q = BlockQueue::new(2);
        for round in 0..50 {
            q.push(round);
            q.push(round + 100);
            assert_eq!(q.pop(), Some(round));
            assert_eq!(q.pop(), Some(round + 100));
        }
        assert!(q.block_count() <= 1);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn queue_runs_added_items_in_order() {
        let queue = Queue::new(QueueConfig {
            block_capacity: 2,
            ..QueueConfig::default()
        })
        .expect("queue");
        let context = queue.scope(&Context::root());
        assert_eq!(context.thread_id(), queue.id());
        let capture = Capture::new(&context);
        for i in 0..5 {
            engine::schedule(capture.cont(), Value::Int(i));
        }
        assert_eq!(queue.fill(), 5);
        while queue.run_one() {}
        let seen: Vec<Value> = core::iter::from_fn(|| capture.take()).collect();
        assert_eq!(seen, (0..5).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn cooperative_slice_requeues_long_chains() {
        let queue = Queue::new(QueueConfig {
            time_slice: Some(2),
            ..QueueConfig::default()
        })
        .expect("queue");
        let context = queue.scope(&Context::root());
        let capture = Capture::new(&context);
        for i in 0..3 {
            engine::resume(capture.cont(), Value::Int(i));
        }
        // Every second resume yields to the queue.
        assert_eq!(capture.count(), 2);
        assert_eq!(queue.fill(), 1);
        assert!(queue.run_one());
        assert_eq!(capture.count(), 3);
    }

    #[test]
    fn worker_pool_completes_scheduled_work() {
        let queue = Queue::new(QueueConfig {
            max_workers: 2,
            max_idle_workers: 1,
            ..QueueConfig::default()
        })
        .expect("queue");
        let context = queue.scope(&Context::root());
        let capture = Capture::new(&context);
        for i in 0..64 {
            engine::schedule(capture.cont(), Value::Int(i));
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while capture.count() < 64 {
            assert!(Instant::now() < deadline, "workers did not drain the queue");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queue.live_workers() <= 2);
        queue.shutdown();
        assert_eq!(queue.live_workers(), 0);
    }

    #[test]
    fn simple_call_waits_for_worker_threads() {
        let queue = Queue::new(QueueConfig {
            max_workers: 1,
            ..QueueConfig::default()
        })
        .expect("queue");
        let context = queue.scope(&Context::root());
        let deferred = Value::function_x(|caller, args| {
            engine::schedule(caller, args.into_iter().next().unwrap_or(Value::Nil));
        });
        let result = engine::simple_call(&context, &deferred, vec![Value::Int(9)]);
        assert_eq!(result, Value::Int(9));
        queue.shutdown();
    }
}
