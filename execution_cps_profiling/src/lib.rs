// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Profiling adapters for `execution_cps` (currently Tracy).
//!
//! This crate is `std`-only and keeps `execution_cps` itself free of profiling dependencies.
//! It listens for queued-step enter/exit callbacks and emits matching profiling spans, reports
//! failed dispatches as messages, and plots queue fill levels.
//!
//! ## Backend
//! This crate currently supports the Tracy backend via `tracy-client`. Without a running Tracy
//! client every hook is a no-op apart from the per-thread bookkeeping.
//!
//! ## Example
//! ```ignore
//! use std::sync::Arc;
//! use execution_cps::{Context, trace};
//! use execution_cps_profiling::ProfilingTraceSink;
//!
//! let _client = tracy_client::Client::start();
//! let context = trace::with_sink(&Context::root(), Arc::new(ProfilingTraceSink::new()));
//! ```

mod resolver;
mod sink;

pub use resolver::{DefaultLabelResolver, FileNameResolver, LabelResolver};
pub use sink::ProfilingTraceSink;
