// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{self, Cont};
use crate::error::{EngineError, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

#[derive(Debug, Default)]
struct State {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
    waiters: VecDeque<(Cont, bool)>,
}

impl State {
    /// Pops every waiter at the head that may run now.
    fn admit(&mut self) -> Vec<Cont> {
        let mut admitted = Vec::new();
        while let Some(&(_, is_writer)) = self.waiters.front() {
            if is_writer {
                if self.writer || self.readers > 0 {
                    break;
                }
                self.writer = true;
                self.waiting_writers -= 1;
            } else {
                if self.writer {
                    break;
                }
                self.readers += 1;
            }
            if let Some((caller, _)) = self.waiters.pop_front() {
                admitted.push(caller);
            }
            if is_writer {
                break;
            }
        }
        admitted
    }
}

/// Read/write lock that queues waiters in arrival order.
///
/// New readers are admitted at once only if no writer holds or waits for the lock, so a waiting
/// writer is never starved by later readers. Acquisitions resume their caller with `true`.
#[derive(Debug, Default)]
pub struct RwLock {
    state: Mutex<State>,
}

impl RwLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Acquires shared access for `caller`, parking it if a writer holds or waits for the lock.
    pub fn rdlock(&self, caller: Cont) {
        let admitted = {
            let mut state = self.state.lock();
            if !state.writer && state.waiting_writers == 0 {
                state.readers += 1;
                Some(caller)
            } else {
                state.waiters.push_back((caller, false));
                None
            }
        };
        if let Some(caller) = admitted {
            engine::resume(caller, Value::Bool(true));
        }
    }

    /// Acquires exclusive access for `caller`, parking it while the lock is held.
    pub fn wrlock(&self, caller: Cont) {
        let admitted = {
            let mut state = self.state.lock();
            if !state.writer && state.readers == 0 {
                state.writer = true;
                Some(caller)
            } else {
                state.waiting_writers += 1;
                state.waiters.push_back((caller, true));
                None
            }
        };
        if let Some(caller) = admitted {
            engine::resume(caller, Value::Bool(true));
        }
    }

    /// Releases one hold and admits the eligible waiters at the head of the queue.
    pub fn unlock(&self) -> Result<()> {
        let admitted = {
            let mut state = self.state.lock();
            if state.writer {
                state.writer = false;
            } else if state.readers > 0 {
                state.readers -= 1;
            } else {
                return Err(EngineError::NotLocked);
            }
            state.admit()
        };
        for caller in admitted {
            engine::resume(caller, Value::Bool(true));
        }
        Ok(())
    }

    /// Returns `(readers, writer)` currently holding the lock.
    #[must_use]
    pub fn holders(&self) -> (usize, bool) {
        let state = self.state.lock();
        (state.readers, state.writer)
    }

    /// Returns the number of parked waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Object for RwLock {
    fn type_of(&self) -> TypeRef {
        types::RWLOCK.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
