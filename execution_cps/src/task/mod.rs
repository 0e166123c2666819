// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tasks and fan-out combinators.
//!
//! A [`Task`] is a single-assignment future. Task sets ([`all`], [`any`]) resolve from a group of
//! tasks, a [`TaskQueue`] bounds how many submitted calls run at once, and [`parallel`],
//! [`buffered`] and [`diffused`] map a function over a sequence without waiting for each call.
//! Resolution schedules parked callers through the context's scheduler rather than resuming them
//! inline, so resolving a task never deepens the resolver's chain.

mod future;
mod parallel;
mod queue;
mod set;
mod stream;

pub use future::Task;
pub use parallel::{FanOut, parallel};
pub use queue::TaskQueue;
pub use set::{all, any};
pub use stream::{MAX_STREAM_SIZE, Stream, buffered, diffused};
