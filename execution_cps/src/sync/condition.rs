// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Semaphore;
use crate::engine::Cont;
use crate::types::{self, TypeRef};
use crate::value::Object;

/// Condition variable paired with a mutex-like [`Semaphore`].
///
/// `wait` releases the semaphore and parks; a signalled waiter goes back through the semaphore's
/// `wait`, so it only resumes once it holds the semaphore again.
#[derive(Debug, Default)]
pub struct Condition {
    waiters: Mutex<VecDeque<(Cont, Arc<Semaphore>)>>,
}

impl Condition {
    /// Creates a condition with no waiters.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Parks `caller` on the condition and signals `semaphore`.
    pub fn wait(&self, caller: Cont, semaphore: &Arc<Semaphore>) {
        self.waiters
            .lock()
            .push_back((caller, Arc::clone(semaphore)));
        semaphore.signal();
    }

    /// Moves the oldest waiter back to its semaphore. Returns `false` if none was waiting.
    pub fn signal(&self) -> bool {
        let waiter = self.waiters.lock().pop_front();
        match waiter {
            Some((caller, semaphore)) => {
                semaphore.wait(caller);
                true
            }
            None => false,
        }
    }

    /// Moves every waiter back to its semaphore, returning how many there were.
    pub fn broadcast(&self) -> usize {
        let waiters = core::mem::take(&mut *self.waiters.lock());
        let count = waiters.len();
        for (caller, semaphore) in waiters {
            semaphore.wait(caller);
        }
        count
    }

    /// Returns the number of parked waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Object for Condition {
    fn type_of(&self) -> TypeRef {
        types::CONDITION.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
