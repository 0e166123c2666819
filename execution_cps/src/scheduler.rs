// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduler contract and preemption.
//!
//! A scheduler decides what happens to a deferred resume: the inline scheduler runs it on the
//! current thread's trampoline, while [`Queue`](crate::queue::Queue) stores it for a later
//! `run_one` or a worker thread. The engine consults [`Preemption`] on every inline resume; once the
//! flag is raised the resume is handed to the context's scheduler instead of continuing inline.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::engine::Cont;
use crate::error::{EngineError, Result};
use crate::trampoline;
use crate::value::Value;

/// Strategy deciding how a deferred resume is run.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Accepts a continuation and the value to resume it with.
    fn add(&self, state: Cont, value: Value);

    /// Runs one stored resume, returning `false` if nothing was stored.
    fn run_one(&self) -> bool {
        false
    }

    /// Number of stored resumes.
    fn fill(&self) -> usize {
        0
    }

    /// Returns `true` if other threads may complete work added to this scheduler.
    fn is_threaded(&self) -> bool {
        false
    }
}

/// Shared scheduler handle, as stored in a context.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Runs every resume inline on the current thread's trampoline.
#[derive(Copy, Clone, Debug, Default)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn add(&self, state: Cont, value: Value) {
        trampoline::push(state, value);
    }
}

/// Preemption counter and flag.
///
/// With a time slice, every [`tick`](Self::tick) decrements the counter and raises the flag when it
/// reaches zero. A timer (or any other thread) may raise the flag at any time with
/// [`raise`](Self::raise). The flag is consumed by the tick that observes it.
#[derive(Debug)]
pub struct Preemption {
    slice: u64,
    counter: AtomicU64,
    flag: AtomicBool,
}

impl Preemption {
    /// Creates a counter that raises the flag every `slice` ticks.
    #[must_use]
    pub fn counting(slice: u64) -> Arc<Self> {
        let slice = slice.max(1);
        Arc::new(Self {
            slice,
            counter: AtomicU64::new(slice),
            flag: AtomicBool::new(false),
        })
    }

    /// Creates a flag that is only raised externally.
    #[must_use]
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            slice: 0,
            counter: AtomicU64::new(0),
            flag: AtomicBool::new(false),
        })
    }

    /// Counts one step; returns `true` if the current continuation should yield.
    pub fn tick(&self) -> bool {
        if self.slice != 0 {
            let slice = self.slice;
            let previous = self
                .counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                    Some(if c <= 1 { slice } else { c - 1 })
                })
                .unwrap_or(slice);
            if previous <= 1 {
                self.flag.store(true, Ordering::Release);
            }
        }
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// Raises the flag so the next tick yields.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Starts a timer thread raising the flag every `interval`.
    ///
    /// The timer stops when the returned handle is dropped.
    pub fn start_timer(self: &Arc<Self>, interval: Duration) -> Result<PreemptTimer> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let preemption = Arc::clone(self);
        let signal = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cps-preempt".into())
            .spawn(move || {
                let (stopped, wake) = &*signal;
                let mut stopped = stopped.lock();
                while !*stopped {
                    if wake.wait_for(&mut stopped, interval).timed_out() {
                        preemption.raise();
                    }
                }
            })
            .map_err(EngineError::WorkerSpawn)?;
        tracing::debug!(?interval, "preemption timer started");
        Ok(PreemptTimer {
            stop,
            handle: Some(handle),
        })
    }
}

/// Handle to a running preemption timer.
pub struct PreemptTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for PreemptTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreemptTimer")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for PreemptTimer {
    fn drop(&mut self) {
        let (stopped, wake) = &*self.stop;
        *stopped.lock() = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("preemption timer panicked");
        }
        tracing::debug!("preemption timer stopped");
    }
}
