// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-thread trampoline driving inline resumes.
//!
//! Each thread keeps a stack of frames; a frame is a FIFO of `(continuation, value)` pairs. An
//! inline resume pushes onto the innermost frame and returns, and whoever opened that frame runs
//! the pairs one after another. Chains of steps therefore never deepen the native stack. Blocking
//! drivers (a simple call waiting for its result, a queue running one item) open a nested frame so
//! the work they wait for is drained by them rather than by an outer loop they are blocking.

use core::cell::RefCell;
use std::collections::VecDeque;

use crate::engine::Cont;
use crate::value::Value;

type Frame = VecDeque<(Cont, Value)>;

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the innermost frame on drop, so a panicking step does not leave it behind.
struct FrameGuard;

impl FrameGuard {
    fn open() -> Self {
        FRAMES.with_borrow_mut(|frames| frames.push(Frame::new()));
        Self
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let leftover = FRAMES.with_borrow_mut(Vec::pop);
        // Dropped outside the borrow: dropping a continuation may run arbitrary code.
        drop(leftover);
    }
}

/// Returns `true` if a frame is open on this thread.
pub(crate) fn active() -> bool {
    FRAMES.with_borrow(|frames| !frames.is_empty())
}

/// Runs `state.resume(value)` inline on this thread.
pub(crate) fn push(state: Cont, value: Value) {
    let unqueued = FRAMES.with_borrow_mut(|frames| match frames.last_mut() {
        Some(frame) => {
            frame.push_back((state, value));
            None
        }
        None => Some((state, value)),
    });
    if let Some((state, value)) = unqueued {
        drive(move || state.resume(value));
    }
}

/// Runs `f` inside the current frame, opening one if none is open.
pub(crate) fn enter(f: impl FnOnce()) {
    if active() { f() } else { drive(f) }
}

/// Opens a nested frame, runs `f`, then drains the frame.
pub(crate) fn drive(f: impl FnOnce()) {
    let _guard = FrameGuard::open();
    f();
    while let Some((state, value)) = FRAMES.with_borrow_mut(|frames| frames.last_mut()?.pop_front())
    {
        state.resume(value);
    }
}

/// Number of pending pairs in the innermost frame.
#[cfg(test)]
pub(crate) fn pending() -> usize {
    FRAMES.with_borrow(|frames| frames.last().map_or(0, VecDeque::len))
}
