// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Values and the capability interface the engine consumes.
//!
//! The engine never looks inside a value beyond its [`Object`] capabilities: hashing,
//! dereferencing, assignment, calling, and the four-step iteration protocol
//! (`iterate`/`iter_next`/`iter_key`/`iter_value`). Scalars are carried inline; everything else is an
//! `Arc<dyn Object>`.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::hash::DefaultHasher;
use std::sync::Arc;

use crate::engine::{self, Cont};
use crate::error::{ErrorKind, ErrorValue};
use crate::types::{self, TypeRef};

/// A script value.
#[derive(Clone)]
pub enum Value {
    /// The absent value.
    Nil,
    /// A boolean.
    Bool(bool),
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Real(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// An error travelling back through a caller chain.
    Error(Arc<ErrorValue>),
    /// Any other value, reached through its capabilities.
    Object(Arc<dyn Object>),
}

impl Value {
    /// Creates a string value.
    #[must_use]
    pub fn str(text: &str) -> Self {
        Self::Str(text.into())
    }

    /// Creates an error value of a core kind.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(Arc::new(ErrorValue::of(kind, message)))
    }

    /// Wraps an object.
    #[must_use]
    pub fn object<T: Object>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    /// Creates a native function that returns its result directly.
    #[must_use]
    pub fn function<F>(body: F) -> Self
    where
        F: Fn(&[Self]) -> Self + Send + Sync + 'static,
    {
        Self::Object(Arc::new(Function {
            body: Box::new(body),
        }))
    }

    /// Creates a native function that receives the caller continuation and resumes it itself.
    #[must_use]
    pub fn function_x<F>(body: F) -> Self
    where
        F: Fn(Cont, Vec<Self>) + Send + Sync + 'static,
    {
        Self::Object(Arc::new(FunctionX {
            body: Box::new(body),
        }))
    }

    /// Returns the value's type descriptor.
    #[must_use]
    pub fn type_of(&self) -> TypeRef {
        match self {
            Self::Nil => types::NIL.clone(),
            Self::Bool(_) => types::BOOLEAN.clone(),
            Self::Int(_) => types::INTEGER.clone(),
            Self::Real(_) => types::REAL.clone(),
            Self::Str(_) => types::STRING.clone(),
            Self::Error(_) => types::ERROR.clone(),
            Self::Object(object) => object.type_of(),
        }
    }

    /// Follows references to the value they hold.
    #[must_use]
    pub fn deref(&self) -> Self {
        match self {
            Self::Object(object) => object.deref().unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    /// Stores `value` through a reference, returning the stored value or an error.
    pub fn assign(&self, value: Self) -> Self {
        match self {
            Self::Object(object) => object.assign(value),
            _ => Self::error(
                ErrorKind::Type,
                format!("<{}> is not assignable", self.type_of()),
            ),
        }
    }

    /// Hashes the value.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self {
            Self::Nil => 0_u8.hash(&mut hasher),
            Self::Bool(b) => b.hash(&mut hasher),
            Self::Int(n) => n.hash(&mut hasher),
            Self::Real(r) => r.to_bits().hash(&mut hasher),
            Self::Str(s) => s.hash(&mut hasher),
            Self::Error(e) => {
                e.kind().hash(&mut hasher);
                e.message().hash(&mut hasher);
            }
            Self::Object(object) => return object.hash_value(),
        }
        hasher.finish()
    }

    /// Returns `true` for `nil`.
    #[must_use]
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns `true` for error values.
    #[must_use]
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the error payload, if any.
    #[must_use]
    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcasts an object value to a concrete type.
    #[must_use]
    pub fn downcast<T: Object>(&self) -> Option<Arc<T>> {
        match self {
            Self::Object(object) => Arc::clone(object).into_any().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Self::Error(Arc::new(err))
    }
}

impl From<crate::error::EngineError> for Value {
    fn from(err: crate::error::EngineError) -> Self {
        ErrorValue::from(err).into()
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Object(a), Self::Object(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Real(r) => write!(f, "{r:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Error(e) => write!(f, "{}: {}", e.kind(), e.message()),
            Self::Object(object) => write!(f, "<{}>", object.type_of()),
        }
    }
}

/// Capabilities of an object value.
///
/// Every method but [`Object::type_of`] and [`Object::into_any`] has a default that reports the
/// capability as missing; callable and iterable objects override the relevant entries. Methods
/// taking a continuation must resume it exactly once (or park it and resume it later).
pub trait Object: Send + Sync + fmt::Debug + 'static {
    /// Returns the object's type descriptor.
    fn type_of(&self) -> TypeRef;

    /// Converts to `Any` for downcasting.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Hashes the object. Defaults to identity.
    fn hash_value(&self) -> u64 {
        core::ptr::from_ref(self).cast::<()>().addr() as u64
    }

    /// Returns the referenced value for reference-like objects.
    fn deref(&self) -> Option<Value> {
        None
    }

    /// Stores a value through a reference-like object.
    fn assign(&self, _value: Value) -> Value {
        Value::error(
            ErrorKind::Type,
            format!("<{}> is not assignable", self.type_of()),
        )
    }

    /// Calls the object, resuming `caller` with the result.
    fn call(self: Arc<Self>, caller: Cont, _args: Vec<Value>) {
        let message = format!("<{}> is not callable", self.type_of());
        engine::resume(caller, Value::error(ErrorKind::Type, message));
    }

    /// Starts iteration, resuming `caller` with an iterator or `nil` when empty.
    fn iterate(self: Arc<Self>, caller: Cont) {
        let message = format!("<{}> is not iterable", self.type_of());
        engine::resume(caller, Value::error(ErrorKind::Type, message));
    }

    /// Advances an iterator, resuming `caller` with the next iterator or `nil`.
    fn iter_next(self: Arc<Self>, caller: Cont) {
        not_an_iterator(&*self, caller);
    }

    /// Resumes `caller` with the current key.
    fn iter_key(self: Arc<Self>, caller: Cont) {
        not_an_iterator(&*self, caller);
    }

    /// Resumes `caller` with the current value.
    fn iter_value(self: Arc<Self>, caller: Cont) {
        not_an_iterator(&*self, caller);
    }
}

fn not_an_iterator<T: Object + ?Sized>(object: &T, caller: Cont) {
    let message = format!("<{}> is not an iterator", object.type_of());
    engine::resume(caller, Value::error(ErrorKind::Type, message));
}

type DirectBody = dyn Fn(&[Value]) -> Value + Send + Sync;
type ContinuationBody = dyn Fn(Cont, Vec<Value>) + Send + Sync;

/// A native function returning its result directly.
pub struct Function {
    body: Box<DirectBody>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").finish_non_exhaustive()
    }
}

impl Object for Function {
    fn type_of(&self) -> TypeRef {
        types::NATIVE.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, args: Vec<Value>) {
        let result = (self.body)(&args);
        engine::resume(caller, result);
    }
}

/// A native function that drives its caller continuation itself.
pub struct FunctionX {
    body: Box<ContinuationBody>,
}

impl fmt::Debug for FunctionX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionX").finish_non_exhaustive()
    }
}

impl Object for FunctionX {
    fn type_of(&self) -> TypeRef {
        types::NATIVE.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn call(self: Arc<Self>, caller: Cont, args: Vec<Value>) {
        (self.body)(caller, args);
    }
}
