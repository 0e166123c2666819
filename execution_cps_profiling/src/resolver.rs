// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::HashMap;
use std::string::String;
use std::sync::Arc;

use execution_cps::Source;
use parking_lot::Mutex;

/// Optional label resolver for profiling scopes.
///
/// Return `None` to fall back to the default location-based labels. Resolvers are shared by every
/// thread the sink observes.
pub trait LabelResolver: Send + Sync {
    /// Resolve a label for a queued step that knows its source location.
    fn step_label(&self, _source: &Source) -> Option<String> {
        None
    }

    /// Resolve a label for a dispatch message.
    fn dispatch_label(&self, _method: &str) -> Option<String> {
        None
    }
}

/// Default resolver that keeps `name:line` labels.
#[derive(Default, Debug)]
pub struct DefaultLabelResolver;

impl LabelResolver for DefaultLabelResolver {}

/// Resolver that drops directory prefixes from source names and caches the result per location.
#[derive(Default, Debug)]
pub struct FileNameResolver {
    cache: Mutex<HashMap<(Arc<str>, u32), String>>,
}

impl LabelResolver for FileNameResolver {
    fn step_label(&self, source: &Source) -> Option<String> {
        let key = (Arc::clone(&source.name), source.line);
        if let Some(label) = self.cache.lock().get(&key) {
            return Some(label.clone());
        }
        let name = source.name.rsplit(['/', '\\']).next().unwrap_or_default();
        let label = format!("{name}:{}", source.line);
        self.cache.lock().insert(key, label.clone());
        Some(label)
    }
}

pub(crate) fn default_step_label(source: Option<&Source>) -> String {
    match source {
        Some(source) => source.to_string(),
        None => String::from("step"),
    }
}

pub(crate) fn default_dispatch_label(method: &str) -> String {
    format!("no method: {method}")
}
