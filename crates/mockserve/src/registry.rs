//! Response registry and mode switching.
//!
//! The stub tables are fixed once the server starts. Only the active mode name
//! changes at runtime: it is held as an immutable `Arc<str>` snapshot that
//! `set_mode` swaps, so a dispatching handler always sees one consistent name.

use crate::types::ResponseData;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stubs grouped by mode plus the currently active mode
pub struct ResponseRegistry {
    modes: HashMap<String, Arc<[ResponseData]>>,
    current: RwLock<Arc<str>>,
}

impl ResponseRegistry {
    /// Build the registry. Duplicate method+URI entries within a mode are kept,
    /// but only the first one can ever match.
    pub fn new(responses: &HashMap<String, Vec<ResponseData>>, initial_mode: &str) -> Self {
        for (mode, stubs) in responses {
            for (index, stub) in stubs.iter().enumerate() {
                if let Some(first) = stubs[..index]
                    .iter()
                    .position(|earlier| earlier.matches(&stub.method, &stub.uri))
                {
                    warn!(
                        "Mode '{}': stub #{} ({} {}) is shadowed by stub #{}",
                        mode, index, stub.method, stub.uri, first
                    );
                }
            }
        }

        if !responses.contains_key(initial_mode) {
            debug!(
                "Initial mode '{}' has no stubs, every request will get 404",
                initial_mode
            );
        }

        Self {
            modes: responses
                .iter()
                .map(|(mode, stubs)| (mode.clone(), Arc::from(stubs.as_slice())))
                .collect(),
            current: RwLock::new(Arc::from(initial_mode)),
        }
    }

    /// Switch the active mode. Unknown names are accepted and match nothing.
    pub fn set_mode(&self, mode: &str) {
        let previous = std::mem::replace(&mut *self.current.write(), Arc::from(mode));
        debug!("Mode switched from '{}' to '{}'", previous, mode);
    }

    pub fn mode(&self) -> Arc<str> {
        Arc::clone(&self.current.read())
    }

    /// Configured mode names, sorted.
    pub fn modes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the first stub of the active mode answering `method` + `uri`.
    /// Returns the mode the lookup ran against together with the stub.
    pub fn lookup(&self, method: &str, uri: &str) -> (Arc<str>, Option<ResponseData>) {
        let mode = self.mode();
        let stub = self
            .modes
            .get(&*mode)
            .and_then(|stubs| stubs.iter().find(|stub| stub.matches(method, uri)))
            .cloned();
        (mode, stub)
    }
}
