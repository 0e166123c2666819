// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multiple dispatch: methods, definitions, and cached method tables.
//!
//! A [`MethodTable`] maps each method to a newest-first chain of [`Definition`]s and memoizes
//! resolutions in cache entries keyed by a hash of `(method, argument types)`.
//!
//! ## Scoring
//!
//! For `n` argument types, a definition with `p` parameter types scores:
//! - 0 if `p > n`, or if `p < n` and it is not variadic;
//! - otherwise a base of 2 for an exact, non-variadic arity and 1 for any other match;
//! - plus `5 + rank` for each of the first `p` positions, where `rank` is the declared parameter
//!   type's rank, or 0 outright if any argument type is not a subtype of its parameter type.
//!
//! The highest score wins. Candidates are compared with a strict `>` in newest-first order, so the
//! most recently defined of equally scored definitions wins, and a parent table's best candidate is
//! only adopted if it strictly beats the child's.
//!
//! ## Invalidation
//!
//! Defining a method in a table clears the cached answer of every entry for that method in that
//! table (entries are linked per method). Other tables, including children whose cache may hold a
//! parent's definition, are left alone. A failed resolution is never cached.

use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::context::{Context, METHODS};
use crate::engine::{self, Cont};
use crate::error::ErrorKind;
use crate::trace::{self, DispatchOutcome};
use crate::types::{self, Type, TypeRef};
use crate::value::{Object, Value};

/// A dispatch key: an identity plus a name.
pub struct Method {
    name: Box<str>,
}

/// Shared method handle. Methods compare by identity.
pub type MethodRef = Arc<Method>;

impl Method {
    /// Creates a fresh, uninterned method.
    #[must_use]
    pub fn new(name: &str) -> MethodRef {
        Arc::new(Self { name: name.into() })
    }

    /// Returns the method interned under `name` in the global registry.
    #[must_use]
    pub fn named(name: &str) -> MethodRef {
        MethodRegistry::global().intern(name)
    }

    /// Returns the method name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn key(this: &MethodRef) -> usize {
        Arc::as_ptr(this).addr()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Method").field(&self.name).finish()
    }
}

impl Object for Method {
    fn type_of(&self) -> TypeRef {
        types::METHOD.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, args: Vec<Value>) {
        let args: Vec<Value> = args.iter().map(Value::deref).collect();
        let arg_types: Vec<TypeRef> = args.iter().map(Value::type_of).collect();
        let context = caller.context();
        let resolved = context
            .methods()
            .and_then(|table| table.resolve(&self, &arg_types));
        if let Some(sink) = trace::sink(context) {
            let outcome = match resolved {
                Some(_) => DispatchOutcome::Resolved,
                None => DispatchOutcome::NotFound,
            };
            sink.dispatch(self.name(), outcome);
        }
        match resolved {
            Some(definition) => engine::call(caller, &definition.callback, args),
            None => engine::resume(caller, no_applicable_method(&self, &arg_types)),
        }
    }
}

/// Builds the error for a call no definition applies to.
#[must_use]
pub fn no_applicable_method(method: &Method, arg_types: &[TypeRef]) -> Value {
    let names: Vec<&str> = arg_types.iter().map(|t| t.name()).collect();
    Value::error(
        ErrorKind::Method,
        format!("no method found for {}({})", method.name(), names.join(", ")),
    )
}

/// Interns methods by name.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: Mutex<HashMap<Box<str>, MethodRef>>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<MethodRegistry> = LazyLock::new(MethodRegistry::new);
        &GLOBAL
    }

    /// Returns the method named `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> MethodRef {
        let mut methods = self.methods.lock();
        if let Some(method) = methods.get(name) {
            return Arc::clone(method);
        }
        let method = Method::new(name);
        methods.insert(name.into(), Arc::clone(&method));
        method
    }

    /// Returns the method named `name` if it was interned.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<MethodRef> {
        self.methods.lock().get(name).cloned()
    }
}

/// One implementation of a method for a parameter-type signature.
pub struct Definition {
    method: MethodRef,
    params: Box<[TypeRef]>,
    variadic: bool,
    callback: Value,
    next: Option<Arc<Definition>>,
}

impl Definition {
    /// Returns the method this definition implements.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Returns the declared parameter types.
    #[must_use]
    pub fn params(&self) -> &[TypeRef] {
        &self.params
    }

    /// Returns `true` if extra arguments are accepted.
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Returns the callable invoked for this definition.
    #[must_use]
    pub fn callback(&self) -> &Value {
        &self.callback
    }

    /// Scores this definition against concrete argument types; 0 means no match.
    #[must_use]
    pub fn score(&self, args: &[TypeRef]) -> u32 {
        let count = self.params.len();
        let mut score = match count.cmp(&args.len()) {
            core::cmp::Ordering::Greater => return 0,
            core::cmp::Ordering::Less if !self.variadic => return 0,
            core::cmp::Ordering::Equal if !self.variadic => 2,
            _ => 1,
        };
        for (param, arg) in self.params.iter().zip(args) {
            if !arg.is_subtype_of(param) {
                return 0;
            }
            score += 5 + param.rank();
        }
        score
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|t| t.name()).collect();
        f.debug_struct("Definition")
            .field("method", &self.method.name())
            .field("params", &params)
            .field("variadic", &self.variadic)
            .finish_non_exhaustive()
    }
}

struct CacheEntry {
    method: MethodRef,
    arg_types: Box<[TypeRef]>,
    definition: Option<Arc<Definition>>,
    score: u32,
    next_in_bucket: Option<usize>,
    next_for_method: Option<usize>,
}

#[derive(Default)]
struct TableState {
    definitions: HashMap<usize, Arc<Definition>>,
    buckets: HashMap<u64, usize>,
    by_method: HashMap<usize, usize>,
    entries: Vec<CacheEntry>,
}

impl TableState {
    fn find_entry(&self, method: &MethodRef, arg_types: &[TypeRef], hash: u64) -> Option<usize> {
        let mut cursor = self.buckets.get(&hash).copied();
        while let Some(index) = cursor {
            let entry = &self.entries[index];
            if Arc::ptr_eq(&entry.method, method)
                && entry.arg_types.len() == arg_types.len()
                && entry
                    .arg_types
                    .iter()
                    .zip(arg_types)
                    .all(|(a, b)| Arc::ptr_eq(a, b))
            {
                return Some(index);
            }
            cursor = entry.next_in_bucket;
        }
        None
    }

    fn insert_entry(&mut self, method: &MethodRef, arg_types: &[TypeRef], hash: u64) -> usize {
        let index = self.entries.len();
        let next_in_bucket = self.buckets.insert(hash, index);
        let next_for_method = self.by_method.insert(Method::key(method), index);
        self.entries.push(CacheEntry {
            method: Arc::clone(method),
            arg_types: arg_types.into(),
            definition: None,
            score: 0,
            next_in_bucket,
            next_for_method,
        });
        index
    }

    fn invalidate(&mut self, key: usize) -> usize {
        let mut cleared = 0;
        let mut cursor = self.by_method.get(&key).copied();
        while let Some(index) = cursor {
            let entry = &mut self.entries[index];
            if entry.definition.take().is_some() {
                cleared += 1;
            }
            cursor = entry.next_for_method;
        }
        cleared
    }

    fn best_local(&self, key: usize, arg_types: &[TypeRef]) -> Option<(Arc<Definition>, u32)> {
        let mut best: Option<(&Arc<Definition>, u32)> = None;
        let mut cursor = self.definitions.get(&key);
        while let Some(definition) = cursor {
            let score = definition.score(arg_types);
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((definition, score));
            }
            cursor = definition.next.as_ref();
        }
        best.map(|(definition, score)| (Arc::clone(definition), score))
    }
}

/// Cache counters for a method table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Resolutions answered from the cache.
    pub hits: u64,
    /// Resolutions that searched definitions.
    pub misses: u64,
    /// Cache entries allocated.
    pub entries: usize,
}

/// Definitions and cached resolutions, optionally inheriting from a parent table.
pub struct MethodTable {
    parent: Option<Arc<MethodTable>>,
    state: Mutex<TableState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MethodTable {
    /// Creates a root table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_parent(None)
    }

    /// Creates a table that falls back to `parent`.
    #[must_use]
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        Self::with_parent(Some(Arc::clone(parent)))
    }

    fn with_parent(parent: Option<Arc<Self>>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            state: Mutex::new(TableState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Returns the parent table.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Registers a definition, invalidating this table's cached resolutions of `method`.
    pub fn define(
        &self,
        method: &MethodRef,
        params: Vec<TypeRef>,
        variadic: bool,
        callback: Value,
    ) -> Arc<Definition> {
        let key = Method::key(method);
        let mut state = self.state.lock();
        let definition = Arc::new(Definition {
            method: Arc::clone(method),
            params: params.into(),
            variadic,
            callback,
            next: state.definitions.get(&key).cloned(),
        });
        state.definitions.insert(key, Arc::clone(&definition));
        let invalidated = state.invalidate(key);
        tracing::debug!(
            method = method.name(),
            params = definition.params.len(),
            variadic,
            invalidated,
            "method defined"
        );
        definition
    }

    /// Resolves `method` for concrete argument types.
    #[must_use]
    pub fn resolve(&self, method: &MethodRef, arg_types: &[TypeRef]) -> Option<Arc<Definition>> {
        let hash = signature_hash(method, arg_types);
        self.search(method, arg_types, hash)
            .map(|(definition, _)| definition)
    }

    fn search(
        &self,
        method: &MethodRef,
        arg_types: &[TypeRef],
        hash: u64,
    ) -> Option<(Arc<Definition>, u32)> {
        let mut state = self.state.lock();
        let found = state.find_entry(method, arg_types, hash);
        if let Some(index) = found
            && let Some(definition) = &state.entries[index].definition
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some((Arc::clone(definition), state.entries[index].score));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut best = state.best_local(Method::key(method), arg_types);
        // Lock order is always child then parent.
        if let Some(parent) = &self.parent
            && let Some((definition, score)) = parent.search(method, arg_types, hash)
            && score > best.as_ref().map_or(0, |(_, s)| *s)
        {
            best = Some((definition, score));
        }
        let (definition, score) = best?;
        let index = match found {
            Some(index) => index,
            None => state.insert_entry(method, arg_types, hash),
        };
        let entry = &mut state.entries[index];
        entry.definition = Some(Arc::clone(&definition));
        entry.score = score;
        Some((definition, score))
    }

    /// Returns cache counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.state.lock().entries.len(),
        }
    }

    /// Calls `function` in a child of the caller's context that uses this table for dispatch.
    pub fn call_with(self: &Arc<Self>, caller: Cont, function: &Value, args: Vec<Value>) {
        let context = caller.context().with(&METHODS, Arc::clone(self));
        engine::call(engine::scoped(caller, context), function, args);
    }

    /// Returns a child of `context` whose method table is a fresh child of the current one.
    #[must_use]
    pub fn scope(context: &Context) -> (Context, Arc<Self>) {
        let table = match context.methods() {
            Some(parent) => Self::child(parent),
            None => Self::new(),
        };
        (context.with(&METHODS, Arc::clone(&table)), table)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MethodTable")
            .field("methods", &state.definitions.len())
            .field("entries", &state.entries.len())
            .field("has_parent", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}

fn signature_hash(method: &MethodRef, arg_types: &[TypeRef]) -> u64 {
    arg_types
        .iter()
        .rev()
        .fold(Method::key(method) as u64, |hash, ty| {
            hash.rotate_left(1) ^ Type::identity(ty)
        })
}
