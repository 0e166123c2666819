// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named configuration checks.
//!
//! Subsystems that want to know something about a context ("is a debugger active?") query a
//! check by name instead of depending on the subsystem that answers it.

use core::fmt;
use std::sync::{Arc, LazyLock};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::context::{Context, PREEMPTION};

/// A boolean question about a context.
pub type ConfigCheck = dyn Fn(&Context) -> bool + Send + Sync;

/// Registry of named checks.
#[derive(Default)]
pub struct ConfigRegistry {
    checks: RwLock<HashMap<Box<str>, Arc<ConfigCheck>>>,
}

impl ConfigRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the engine's own checks.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("debugger", |context| context.debugger().is_some());
        registry.register("scheduler", |context| context.scheduler().is_some());
        registry.register("preemptive", |context| context.get(&PREEMPTION).is_some());
        registry.register("threaded", |context| {
            context.scheduler().is_some_and(|s| s.is_threaded())
        });
        registry
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<ConfigRegistry> = LazyLock::new(ConfigRegistry::with_defaults);
        &GLOBAL
    }

    /// Registers or replaces a check.
    pub fn register<F>(&self, name: &str, check: F)
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.checks.write().insert(name.into(), Arc::new(check));
    }

    /// Evaluates a check, or returns `None` if no check has that name.
    #[must_use]
    pub fn query(&self, name: &str, context: &Context) -> Option<bool> {
        let check = self.checks.read().get(name).cloned()?;
        Some(check(context))
    }

    /// Returns the registered check names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.read().keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("checks", &self.names())
            .finish()
    }
}
