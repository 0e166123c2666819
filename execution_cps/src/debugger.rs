// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Debugger hooks.
//!
//! The engine only asks three things of a continuation: whether it carries debug information
//! ([`Step::check`]), where it is ([`Step::source`]), and how to step from it
//! ([`Step::step_mode`]). A [`Debugger`] installed in the context decides what to do with a
//! paused continuation; without one, every hook here degrades to a plain resume.

use core::fmt;

use crate::context::Context;
use crate::engine::{self, Cont, Step};
use crate::error::{ErrorKind, MAX_TRACE, Source};
use crate::value::Value;

/// A debugger that may take ownership of paused continuations.
pub trait Debugger: Send + Sync + fmt::Debug {
    /// Returns `true` if errors passing through checked continuations should pause.
    fn break_on_error(&self) -> bool {
        false
    }

    /// Returns `true` if the debugger wants to pause at this breakpoint.
    fn claims(&self, _state: &dyn Step) -> bool {
        true
    }

    /// Takes a paused continuation; the debugger resumes it when the user continues.
    fn pause(&self, state: Cont, value: Value);
}

/// Returns the nearest known source location, walking callers outwards.
#[must_use]
pub fn source(state: &dyn Step) -> Source {
    let mut cursor = Some(state);
    while let Some(step) = cursor {
        if let Some(source) = step.source() {
            return source;
        }
        cursor = step.caller();
    }
    Source::unknown()
}

/// Collects up to [`MAX_TRACE`] source frames along the caller chain.
///
/// Fails with a `DebugError` if no continuation in the chain carries debug information.
pub fn trace(state: &dyn Step) -> Result<Vec<Source>, Value> {
    let mut frames = Vec::new();
    let mut checked = false;
    let mut cursor = Some(state);
    while let Some(step) = cursor {
        checked |= step.check();
        if let Some(source) = step.source()
            && frames.len() < MAX_TRACE
        {
            frames.push(source);
        }
        cursor = step.caller();
    }
    if !checked {
        return Err(Value::error(ErrorKind::Debug, "Trace not available"));
    }
    Ok(frames)
}

/// Reads a local variable from a paused continuation.
pub fn local(state: &dyn Step, index: usize) -> Result<Value, Value> {
    state
        .local(index)
        .ok_or_else(|| Value::error(ErrorKind::Debug, "Locals not available"))
}

/// Hands `state` to the context's debugger if it claims the breakpoint, otherwise resumes it.
pub fn breakpoint(state: Cont, value: Value) {
    let debugger = state.context().debugger().cloned();
    match debugger {
        Some(debugger) if state.check() && debugger.claims(&*state) => {
            tracing::trace!(source = %source(&*state), "breakpoint");
            debugger.pause(state, value);
        }
        _ => engine::resume(state, value),
    }
}

/// A continuation carrying a source location, passing its value to `caller`.
///
/// Once a step mode is set, resuming it pauses in the context's debugger first.
struct Located {
    context: Context,
    caller: Cont,
    source: Source,
    locals: Vec<Value>,
    stepping: bool,
}

impl Step for Located {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(mut self: Box<Self>, value: Value) {
        if self.stepping
            && let Some(debugger) = self.context.debugger().cloned()
        {
            self.stepping = false;
            return debugger.pause(self, value);
        }
        engine::resume(self.caller, value);
    }

    fn caller(&self) -> Option<&dyn Step> {
        Some(&*self.caller)
    }

    fn source(&self) -> Option<Source> {
        Some(self.source.clone())
    }

    fn check(&self) -> bool {
        true
    }

    fn step_mode(&mut self, step_over: bool, step_out: bool) {
        // Stepping out pauses at the next located caller instead of here.
        self.stepping = step_over && !step_out;
        if step_out {
            self.caller.step_mode(true, false);
        }
    }

    fn local(&self, index: usize) -> Option<Value> {
        self.locals.get(index).cloned()
    }
}

/// Wraps `caller` in a continuation located at `source` with the given locals.
#[must_use]
pub fn located(caller: Cont, source: Source, locals: Vec<Value>) -> Cont {
    Box::new(Located {
        context: caller.context().clone(),
        caller,
        source,
        locals,
        stepping: false,
    })
}

/// Sets the step mode of a paused continuation.
pub fn step_mode(state: &mut dyn Step, step_over: bool, step_out: bool) {
    state.step_mode(step_over, step_out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DEBUGGER;
    use crate::test_support::Capture;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Recorder {
        on_error: bool,
        paused: Mutex<Vec<(Cont, Value)>>,
    }

    impl Debugger for Recorder {
        fn break_on_error(&self) -> bool {
            self.on_error
        }

        fn pause(&self, state: Cont, value: Value) {
            self.paused.lock().push((state, value));
        }
    }

    impl Recorder {
        fn take(&self) -> (Cont, Value) {
            self.paused.lock().remove(0)
        }
    }

    fn with_debugger(on_error: bool) -> (Context, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            on_error,
            ..Recorder::default()
        });
        let context = Context::root().with(&DEBUGGER, Arc::clone(&recorder) as Arc<dyn Debugger>);
        (context, recorder)
    }

    #[test]
    fn source_walks_callers_and_defaults_to_unknown() {
        let context = Context::root();
        let capture = Capture::new(&context);
        assert_eq!(source(&*capture.cont()), Source::unknown());
        let inner = located(capture.cont(), Source::new("main", 4), Vec::new());
        let outer = engine::then(inner, engine::resume);
        assert_eq!(source(&*outer), Source::new("main", 4));
    }

    #[test]
    fn trace_and_locals_need_debug_information() {
        let context = Context::root();
        let capture = Capture::new(&context);
        let err = trace(&*capture.cont()).expect_err("no debug info");
        assert!(err.as_error().is_some_and(|e| e.is(ErrorKind::Debug)));
        let err = local(&*capture.cont(), 0).expect_err("no locals");
        assert_eq!(err.as_error().map(|e| e.message()), Some("Locals not available"));

        let a = located(capture.cont(), Source::new("a", 1), vec![Value::Int(3)]);
        let b = located(a, Source::new("b", 2), Vec::new());
        let frames = trace(&*b).expect("checked chain");
        assert_eq!(frames, [Source::new("b", 2), Source::new("a", 1)]);
        assert_eq!(local(b.caller().expect("caller"), 0), Ok(Value::Int(3)));
    }

    #[test]
    fn errors_pause_in_the_debugger_when_asked() {
        let (context, recorder) = with_debugger(true);
        let capture = Capture::new(&context);
        let state = located(capture.cont(), Source::new("main", 9), Vec::new());
        engine::resume(state, Value::error(ErrorKind::State, "bad"));
        assert_eq!(capture.count(), 0);
        let (state, value) = recorder.take();
        assert_eq!(source(&*state), Source::new("main", 9));
        state.resume(value);
        let delivered = capture.take().expect("resumed after pause");
        let err = delivered.as_error().expect("error value");
        assert_eq!(err.trace(), [Source::new("main", 9)]);
    }

    #[test]
    fn breakpoints_without_a_debugger_resume_inline() {
        let context = Context::root();
        let capture = Capture::new(&context);
        breakpoint(located(capture.cont(), Source::new("m", 1), Vec::new()), Value::Int(1));
        assert_eq!(capture.take(), Some(Value::Int(1)));
    }

    #[test]
    fn step_over_pauses_again_on_resume() {
        let (context, recorder) = with_debugger(false);
        let capture = Capture::new(&context);
        breakpoint(located(capture.cont(), Source::new("m", 1), Vec::new()), Value::Int(2));
        let (mut state, value) = recorder.take();
        step_mode(&mut *state, true, false);
        state.resume(value);
        assert_eq!(capture.count(), 0);
        let (state, value) = recorder.take();
        state.resume(value);
        assert_eq!(capture.take(), Some(Value::Int(2)));
    }
}
