// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use std::string::String;
use std::vec::Vec;

use crate::resolver::{
    DefaultLabelResolver, LabelResolver, default_dispatch_label, default_step_label,
};
use execution_cps::Source;
use execution_cps::trace::{DispatchOutcome, TraceSink};

type BackendGuard = tracy_client::Span;

struct ScopeEntry {
    sink: u64,
    // Keep the label alive for backends that may borrow it.
    label: String,
    guard: Option<BackendGuard>,
}

thread_local! {
    // Spans are per thread; steps entered on a worker exit on that same worker.
    static STACK: RefCell<Vec<ScopeEntry>> = const { RefCell::new(Vec::new()) };
}

static NEXT_SINK: AtomicU64 = AtomicU64::new(1);

/// A `TraceSink` that emits Tracy spans for queued steps, messages for failed dispatches, and a
/// plot of queue fill levels.
pub struct ProfilingTraceSink<R = DefaultLabelResolver> {
    id: u64,
    resolver: R,
}

impl ProfilingTraceSink<DefaultLabelResolver> {
    /// Create a new sink with location-based labels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: LabelResolver> ProfilingTraceSink<R> {
    /// Create a new sink with a custom label resolver.
    #[must_use]
    pub fn with_resolver(resolver: R) -> Self {
        Self {
            id: NEXT_SINK.fetch_add(1, Ordering::Relaxed),
            resolver,
        }
    }

    fn on_step_enter(&self, source: Option<&Source>) {
        let label = self.resolve_label(source);
        let line = source.map_or(0, |source| source.line);
        let guard = self.start_scope(&label, line);
        STACK.with_borrow_mut(|stack| {
            stack.push(ScopeEntry {
                sink: self.id,
                label,
                guard,
            });
        });
    }

    fn on_step_exit(&self) {
        STACK.with_borrow_mut(|stack| {
            if stack.last().is_some_and(|top| top.sink == self.id) {
                if let Some(entry) = stack.pop() {
                    let ScopeEntry {
                        label: _label,
                        guard: _guard,
                        ..
                    } = entry;
                    let _ = (_label, _guard);
                }
                return;
            }
            // If the stack got out of sync, drop this sink's scopes to avoid leaking.
            drop_active_scopes(stack, self.id);
        });
    }

    fn resolve_label(&self, source: Option<&Source>) -> String {
        source
            .and_then(|source| self.resolver.step_label(source))
            .unwrap_or_else(|| default_step_label(source))
    }

    fn start_scope(&self, label: &str, line: u32) -> Option<BackendGuard> {
        let client = tracy_client::Client::running()?;
        Some(client.span_alloc(Some(label), "execution_cps.step", "execution_cps", line, 0))
    }
}

// Drop in LIFO order so nested spans close inner-to-outer.
fn drop_active_scopes(stack: &mut Vec<ScopeEntry>, sink: u64) {
    while let Some(index) = stack.iter().rposition(|entry| entry.sink == sink) {
        let ScopeEntry {
            label: _label,
            guard: _guard,
            ..
        } = stack.remove(index);
        let _ = (_label, _guard);
    }
}

impl<R: LabelResolver> TraceSink for ProfilingTraceSink<R> {
    fn step_enter(&self, source: Option<&Source>) {
        self.on_step_enter(source);
    }

    fn step_exit(&self) {
        self.on_step_exit();
    }

    fn dispatch(&self, method: &str, outcome: DispatchOutcome) {
        if outcome != DispatchOutcome::NotFound {
            return;
        }
        let Some(client) = tracy_client::Client::running() else {
            return;
        };
        let label = self
            .resolver
            .dispatch_label(method)
            .unwrap_or_else(|| default_dispatch_label(method));
        client.message(&label, 0);
    }

    fn queue_fill(&self, fill: usize) {
        if let Some(client) = tracy_client::Client::running() {
            client.plot(tracy_client::plot_name!("execution_cps.queue_fill"), fill as f64);
        }
    }
}

impl<R> Default for ProfilingTraceSink<R>
where
    R: LabelResolver + Default,
{
    fn default() -> Self {
        Self::with_resolver(R::default())
    }
}

impl<R> std::fmt::Debug for ProfilingTraceSink<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depth = STACK.with_borrow(|stack| {
            stack.iter().filter(|entry| entry.sink == self.id).count()
        });
        f.debug_struct("ProfilingTraceSink")
            .field("id", &self.id)
            .field("stack_depth", &depth)
            .finish_non_exhaustive()
    }
}
