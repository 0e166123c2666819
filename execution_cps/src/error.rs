// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error values and engine errors.
//!
//! Script-visible failures are ordinary values ([`ErrorValue`]) delivered by resuming the waiting
//! continuation. Host-facing failures (thread spawning, stack allocation, misuse of primitives from
//! Rust) are [`EngineError`], which converts into an [`ErrorValue`] whenever it has to reach a
//! continuation.

use core::fmt;
use std::io;
use std::sync::Arc;

/// Maximum number of source frames recorded on an error.
pub const MAX_TRACE: usize = 16;

/// A `(name, line)` source location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Source {
    /// Source name (file, module, or function label).
    pub name: Arc<str>,
    /// One-based line number, or 0 when unknown.
    pub line: u32,
}

impl Source {
    /// Creates a source location.
    #[must_use]
    pub fn new(name: &str, line: u32) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }

    /// The location reported when nothing in a caller chain knows its source.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.line)
    }
}

/// Error kinds produced by the core.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No definition applies to a method call.
    Method,
    /// A state was used outside its call chain or resolved twice.
    State,
    /// A task was resolved twice.
    Task,
    /// A channel was used while closed.
    Channel,
    /// Coroutine stack allocation failed or hit its limit.
    Stack,
    /// Debug information was requested from a continuation without any.
    Debug,
    /// A value lacks the capability an operation needs.
    Type,
    /// An argument was outside its accepted range.
    Range,
}

impl ErrorKind {
    /// Returns the kind string carried by error values.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Method => "MethodError",
            Self::State => "StateError",
            Self::Task => "TaskError",
            Self::Channel => "ChannelError",
            Self::Stack => "StackError",
            Self::Debug => "DebugError",
            Self::Type => "TypeError",
            Self::Range => "RangeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error value: kind, message, and a bounded source trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorValue {
    kind: Box<str>,
    message: String,
    trace: Vec<Source>,
}

impl ErrorValue {
    /// Creates an error value with an arbitrary kind string.
    #[must_use]
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Creates an error value of a core kind.
    #[must_use]
    pub fn of(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind.as_str(), message)
    }

    /// Returns the kind string.
    #[must_use]
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns `true` if this error has the given core kind.
    #[must_use]
    #[inline]
    pub fn is(&self, kind: ErrorKind) -> bool {
        &*self.kind == kind.as_str()
    }

    /// Returns the message.
    #[must_use]
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the recorded frames, innermost first.
    #[must_use]
    #[inline]
    pub fn trace(&self) -> &[Source] {
        &self.trace
    }

    /// Appends a frame; returns `false` once the trace is full.
    pub fn push_trace(&mut self, source: Source) -> bool {
        if self.trace.len() >= MAX_TRACE {
            return false;
        }
        self.trace.push(source);
        true
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for source in &self.trace {
            write!(f, "\n\t{source}")?;
        }
        Ok(())
    }
}

impl core::error::Error for ErrorValue {}

/// Host-facing engine failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
    /// A coroutine stack thread could not be spawned.
    #[error("failed to allocate coroutine stack: {0}")]
    StackSpawn(#[source] io::Error),
    /// The coroutine pool is at its configured limit.
    #[error("coroutine stack limit of {limit} reached")]
    StackLimit {
        /// The configured limit.
        limit: usize,
    },
    /// A yield call was made outside a coroutine.
    #[error("Must be called from a coroutine")]
    NotInCoroutine,
    /// The continuation waiting on a coroutine's yield call was dropped.
    #[error("coroutine was abandoned")]
    Abandoned,
    /// A task was resolved twice.
    #[error("Task value already set")]
    TaskAlreadySet,
    /// A channel was used while closed.
    #[error("Channel is not open")]
    ChannelClosed,
    /// A lock was released without being held.
    #[error("RWLock is not locked")]
    NotLocked,
    /// A sizing argument was outside its accepted range.
    #[error("{what} out of range")]
    OutOfRange {
        /// What was out of range.
        what: &'static str,
    },
}

impl EngineError {
    /// Returns the error-value kind this error maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkerSpawn(_) | Self::NotInCoroutine | Self::Abandoned | Self::NotLocked => {
                ErrorKind::State
            }
            Self::StackSpawn(_) | Self::StackLimit { .. } => ErrorKind::Stack,
            Self::TaskAlreadySet => ErrorKind::Task,
            Self::ChannelClosed => ErrorKind::Channel,
            Self::OutOfRange { .. } => ErrorKind::Range,
        }
    }
}

impl From<EngineError> for ErrorValue {
    fn from(err: EngineError) -> Self {
        Self::of(err.kind(), err.to_string())
    }
}

/// Result alias for host-facing operations.
pub type Result<T, E = EngineError> = core::result::Result<T, E>;
