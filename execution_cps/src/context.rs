// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contexts: copy-on-extend slot vectors inherited along a call chain.
//!
//! A context is created by copying its parent's slots; setting a slot afterwards
//! ([`Context::set_static`]) copies the slot vector if it is shared, so parents and siblings never
//! observe the change. Slot indices are typed [`ContextKey`]s: a handful are reserved up front and
//! other subsystems reserve more at runtime with [`ContextKey::reserve`]. A context created before a
//! key was reserved simply reports that slot as empty.

use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::debugger::Debugger;
use crate::engine::{self, Cont};
use crate::method::MethodTable;
use crate::scheduler::{Preemption, SchedulerRef};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

/// Typed index of a context slot.
pub struct ContextKey<T> {
    index: usize,
    marker: PhantomData<fn() -> T>,
}

const RESERVED_SLOTS: usize = 6;

static NEXT_INDEX: AtomicUsize = AtomicUsize::new(RESERVED_SLOTS);

impl<T: Any + Send + Sync> ContextKey<T> {
    const fn reserved(index: usize) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }

    /// Reserves a fresh slot index.
    #[must_use]
    pub fn reserve() -> Self {
        Self::reserved(NEXT_INDEX.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw slot index.
    #[must_use]
    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.index).finish()
    }
}

/// Scheduler used to defer resumes.
pub const SCHEDULER: ContextKey<SchedulerRef> = ContextKey::reserved(0);
/// Method table used by dispatch.
pub const METHODS: ContextKey<Arc<MethodTable>> = ContextKey::reserved(1);
/// Active debugger.
pub const DEBUGGER: ContextKey<Arc<dyn Debugger>> = ContextKey::reserved(2);
/// Preemption counter/flag consulted on every resume.
pub const PREEMPTION: ContextKey<Arc<Preemption>> = ContextKey::reserved(3);
/// Identifier of the logical thread owning the chain.
pub const THREAD: ContextKey<u64> = ContextKey::reserved(4);
/// Context-variable bindings.
pub const BINDINGS: ContextKey<Arc<Binding>> = ContextKey::reserved(5);

type Slot = Option<Arc<dyn Any + Send + Sync>>;

#[derive(Clone)]
struct Inner {
    parent: Option<Weak<Inner>>,
    slots: Vec<Slot>,
}

/// An inherited bag of ambient settings for a call chain.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Creates a context with no slots set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                parent: None,
                slots: vec![None; NEXT_INDEX.load(Ordering::Relaxed)],
            }),
        }
    }

    /// Creates a root context with a fresh root method table.
    #[must_use]
    pub fn root() -> Self {
        let mut context = Self::empty();
        context.set_static(&METHODS, MethodTable::new());
        context
    }

    /// Creates a child context holding a copy of this context's slots.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut slots = self.inner.slots.clone();
        let size = NEXT_INDEX.load(Ordering::Relaxed);
        if slots.len() < size {
            slots.resize(size, None);
        }
        Self {
            inner: Arc::new(Inner {
                parent: Some(Arc::downgrade(&self.inner)),
                slots,
            }),
        }
    }

    /// Creates a child context with one slot replaced.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(&self, key: &ContextKey<T>, value: T) -> Self {
        let mut child = self.child();
        child.set_static(key, value);
        child
    }

    /// Sets a slot on this context handle.
    ///
    /// The slot vector is copied first if any other handle shares it.
    pub fn set_static<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>, value: T) {
        let inner = Arc::make_mut(&mut self.inner);
        if inner.slots.len() <= key.index {
            inner.slots.resize(key.index + 1, None);
        }
        inner.slots[key.index] = Some(Arc::new(value));
    }

    /// Reads a slot.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.inner.slots.get(key.index)?.as_deref()?.downcast_ref::<T>()
    }

    /// Returns the parent context if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let inner = self.inner.parent.as_ref()?.upgrade()?;
        Some(Self { inner })
    }

    /// Returns the installed scheduler.
    #[must_use]
    #[inline]
    pub fn scheduler(&self) -> Option<&SchedulerRef> {
        self.get(&SCHEDULER)
    }

    /// Returns the installed method table.
    #[must_use]
    #[inline]
    pub fn methods(&self) -> Option<&Arc<MethodTable>> {
        self.get(&METHODS)
    }

    /// Returns the installed debugger.
    #[must_use]
    #[inline]
    pub fn debugger(&self) -> Option<&Arc<dyn Debugger>> {
        self.get(&DEBUGGER)
    }

    /// Returns the logical thread id, or 0 for the main chain.
    #[must_use]
    #[inline]
    pub fn thread_id(&self) -> u64 {
        self.get(&THREAD).copied().unwrap_or(0)
    }

    /// Returns `true` if both handles share the same slot vector.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.inner.slots.iter().filter(|s| s.is_some()).count();
        f.debug_struct("Context")
            .field("slots", &self.inner.slots.len())
            .field("set", &set)
            .finish_non_exhaustive()
    }
}

/// One context-variable binding; bindings form a chain from innermost outwards.
#[derive(Debug)]
pub struct Binding {
    variable: Arc<ContextVar>,
    value: Value,
    next: Option<Arc<Binding>>,
}

/// A variable whose value is bound per call chain.
///
/// Calling it with no arguments returns the innermost binding (or the default). Calling it as
/// `var(value, function, args...)` calls `function(args...)` in a context where the variable is
/// bound to `value`.
#[derive(Debug)]
pub struct ContextVar {
    default: Value,
}

impl ContextVar {
    /// Creates a context variable with a default value.
    #[must_use]
    pub fn new(default: Value) -> Arc<Self> {
        Arc::new(Self { default })
    }

    /// Returns the innermost binding visible from `context`.
    #[must_use]
    pub fn get(self: &Arc<Self>, context: &Context) -> Value {
        let mut binding = context.get(&BINDINGS);
        while let Some(b) = binding {
            if Arc::ptr_eq(&b.variable, self) {
                return b.value.clone();
            }
            binding = b.next.as_ref();
        }
        self.default.clone()
    }

    /// Returns a child of `context` with this variable bound to `value`.
    #[must_use]
    pub fn bind(self: &Arc<Self>, context: &Context, value: Value) -> Context {
        let binding = Binding {
            variable: Arc::clone(self),
            value,
            next: context.get(&BINDINGS).cloned(),
        };
        context.with(&BINDINGS, Arc::new(binding))
    }
}

impl Object for ContextVar {
    fn type_of(&self) -> TypeRef {
        types::CONTEXT_VAR.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, mut args: Vec<Value>) {
        if args.is_empty() {
            let value = self.get(caller.context());
            return engine::resume(caller, value);
        }
        if args.len() < 2 {
            return engine::resume(
                caller,
                Value::error(
                    crate::error::ErrorKind::Type,
                    "context variable needs a value and a function",
                ),
            );
        }
        let rest = args.split_off(2);
        let function = args.pop().unwrap_or(Value::Nil);
        let value = args.pop().unwrap_or(Value::Nil);
        let context = self.bind(caller.context(), value);
        engine::call(engine::scoped(caller, context), &function, rest);
    }
}
