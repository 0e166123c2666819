// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Continuation-parking synchronization primitives.
//!
//! Every primitive keeps a small state plus a FIFO of parked continuations. An operation either
//! succeeds at once (resuming its caller) or parks the caller; a complementary operation releases
//! one or all parked callers in arrival order. Parked continuations are always resumed after the
//! primitive's lock is released, so a resumed chain may immediately use the same primitive again.

mod channel;
mod condition;
mod rwlock;
mod semaphore;

pub use channel::Channel;
pub use condition::Condition;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
