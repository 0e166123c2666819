// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Optional trace hooks for profilers and diagnostics.
//!
//! A [`TraceSink`] installed in a context (under [`SINK`]) observes queued steps, dispatch outcomes,
//! and queue fill levels for every chain running under that context. Without a sink the engine
//! pays one slot lookup per event site.

use core::fmt;
use std::sync::{Arc, LazyLock};

use crate::context::{Context, ContextKey};
use crate::error::Source;

/// Outcome of a method dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A definition was found.
    Resolved,
    /// No definition applied.
    NotFound,
}

/// Receiver for engine trace events.
///
/// Events may arrive from any thread; `step_enter`/`step_exit` pairs nest per thread.
pub trait TraceSink: Send + Sync + fmt::Debug {
    /// A queued resume is about to run on the current thread.
    fn step_enter(&self, _source: Option<&Source>) {}

    /// The queued resume entered last on this thread has returned.
    fn step_exit(&self) {}

    /// A method call was dispatched.
    fn dispatch(&self, _method: &str, _outcome: DispatchOutcome) {}

    /// A resume was deferred to a queue now holding `fill` items.
    fn queue_fill(&self, _fill: usize) {}
}

/// Context slot holding the active trace sink.
pub static SINK: LazyLock<ContextKey<Arc<dyn TraceSink>>> = LazyLock::new(ContextKey::reserve);

/// Returns the sink installed in `context`.
#[must_use]
#[inline]
pub fn sink(context: &Context) -> Option<&Arc<dyn TraceSink>> {
    context.get(&*SINK)
}

/// Returns a child of `context` with `sink` installed.
#[must_use]
pub fn with_sink(context: &Context, sink: Arc<dyn TraceSink>) -> Context {
    context.with(&*SINK, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::method::Method;
    use crate::queue::{Queue, QueueConfig};
    use crate::scheduler::Scheduler;
    use crate::value::Value;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TraceSink for Recorder {
        fn step_enter(&self, _source: Option<&Source>) {
            self.events.lock().push("enter".into());
        }

        fn step_exit(&self) {
            self.events.lock().push("exit".into());
        }

        fn dispatch(&self, method: &str, outcome: DispatchOutcome) {
            self.events.lock().push(format!("{method}:{outcome:?}"));
        }

        fn queue_fill(&self, fill: usize) {
            self.events.lock().push(format!("fill:{fill}"));
        }
    }

    #[test]
    fn sink_observes_queue_and_dispatch_events() {
        let recorder = Arc::new(Recorder::default());
        let queue = Queue::new(QueueConfig::default()).expect("queue");
        let context = with_sink(&queue.scope(&Context::root()), recorder.clone());
        let missing = Value::object(Method::new("missing"));
        let result = engine::simple_call(&context, &missing, vec![Value::Int(1)]);
        assert!(result.is_error());
        engine::schedule(engine::discard(&context), Value::Nil);
        assert!(queue.run_one());
        let events = recorder.events.lock().clone();
        assert_eq!(events, ["missing:NotFound", "fill:1", "enter", "exit"]);
    }

    #[test]
    fn contexts_without_a_sink_report_none() {
        assert!(sink(&Context::root()).is_none());
    }
}
