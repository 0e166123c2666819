// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type descriptors.
//!
//! The core only needs three facts about a type: its name (for diagnostics), its parents (for
//! subtype checks), and its rank (dispatch specificity). Every type is implicitly a subtype of
//! [`ANY`].

use core::fmt;
use core::ptr;
use std::sync::{Arc, LazyLock};

/// Shared handle to a type descriptor. Types compare by identity.
pub type TypeRef = Arc<Type>;

/// A type descriptor: name, parent types, and dispatch rank.
pub struct Type {
    name: Box<str>,
    parents: Box<[TypeRef]>,
    rank: u32,
}

impl Type {
    /// Creates a type whose rank is one more than its highest-ranked parent.
    ///
    /// A type without parents derives from [`ANY`] and has rank 1.
    #[must_use]
    pub fn new(name: &str, parents: &[TypeRef]) -> TypeRef {
        let rank = parents.iter().map(|p| p.rank + 1).max().unwrap_or(1);
        Self::with_rank(name, parents, rank)
    }

    /// Creates a type with an explicit rank.
    #[must_use]
    pub fn with_rank(name: &str, parents: &[TypeRef], rank: u32) -> TypeRef {
        Arc::new(Self {
            name: name.into(),
            parents: parents.into(),
            rank,
        })
    }

    /// Returns the type name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dispatch rank (higher is more specific).
    #[must_use]
    #[inline]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Returns the direct parents.
    #[must_use]
    #[inline]
    pub fn parents(&self) -> &[TypeRef] {
        &self.parents
    }

    /// Returns `true` if `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        if ptr::eq(self, other) || ptr::eq(other, Arc::as_ptr(&*ANY)) {
            return true;
        }
        self.parents.iter().any(|p| p.is_subtype_of(other))
    }

    /// Identity used by dispatch hashing.
    #[inline]
    pub(crate) fn identity(this: &TypeRef) -> u64 {
        Arc::as_ptr(this).addr() as u64
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Type")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

macro_rules! builtin_types {
    ($($(#[$doc:meta])* $ident:ident = $name:literal [$($parent:ident),*];)*) => {
        $(
            $(#[$doc])*
            pub static $ident: LazyLock<TypeRef> =
                LazyLock::new(|| Type::new($name, &[$(Arc::clone(&*$parent)),*]));
        )*
    };
}

/// Root of the type lattice.
pub static ANY: LazyLock<TypeRef> = LazyLock::new(|| Type::with_rank("any", &[], 0));

builtin_types! {
    /// Type of `nil`.
    NIL = "nil" [ANY];
    /// Type of booleans.
    BOOLEAN = "boolean" [ANY];
    /// Parent of numeric types.
    NUMBER = "number" [ANY];
    /// Type of integers.
    INTEGER = "integer" [NUMBER];
    /// Type of reals.
    REAL = "real" [NUMBER];
    /// Type of strings.
    STRING = "string" [ANY];
    /// Type of error values.
    ERROR = "error" [ANY];
    /// Parent of every callable.
    FUNCTION = "function" [ANY];
    /// Type of native functions.
    NATIVE = "native" [FUNCTION];
    /// Type of dispatch keys.
    METHOD = "method" [FUNCTION];
    /// Type of coroutine-backed functions.
    COFUNCTION = "cofunction" [FUNCTION];
    /// Type of context variables.
    CONTEXT_VAR = "context-var" [FUNCTION];
    /// Type of single-assignment tasks.
    TASK = "task" [FUNCTION];
    /// Type of task sets.
    TASK_SET = "task-set" [TASK];
    /// Type of bounded task queues.
    TASK_QUEUE = "task-queue" [FUNCTION];
    /// Parent of lazily evaluated sequences.
    SEQUENCE = "sequence" [ANY];
    /// Type of order-preserving fan-out sequences.
    BUFFERED = "buffered" [SEQUENCE];
    /// Type of completion-order fan-out sequences.
    DIFFUSED = "diffused" [SEQUENCE];
    /// Type of counting semaphores.
    SEMAPHORE = "semaphore" [ANY];
    /// Type of condition variables.
    CONDITION = "condition" [ANY];
    /// Type of read/write locks.
    RWLOCK = "rwlock" [ANY];
    /// Type of rendezvous channels.
    CHANNEL = "channel" [ANY];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_follows_deepest_parent() {
        assert_eq!(ANY.rank(), 0);
        assert_eq!(NUMBER.rank(), 1);
        assert_eq!(INTEGER.rank(), 2);
        let custom = Type::new("custom", &[]);
        assert_eq!(custom.rank(), 1);
        let mixed = Type::new("mixed", &[custom.clone(), INTEGER.clone()]);
        assert_eq!(mixed.rank(), 3);
    }

    #[test]
    fn subtype_walks_parents_and_any_is_universal() {
        assert!(INTEGER.is_subtype_of(&NUMBER));
        assert!(INTEGER.is_subtype_of(&INTEGER));
        assert!(!NUMBER.is_subtype_of(&INTEGER));
        assert!(!INTEGER.is_subtype_of(&STRING));
        let orphan = Type::new("orphan", &[]);
        assert!(orphan.is_subtype_of(&ANY));
        assert!(TASK_SET.is_subtype_of(&FUNCTION));
    }
}
