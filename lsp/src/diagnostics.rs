//! Cache of the most recently pushed diagnostics per file.
//!
//! The only writer is the `textDocument/publishDiagnostics` notification
//! handler; each push replaces a file's set wholesale. Reads are local
//! and never talk to the server, so a freshly opened file reports no
//! diagnostics until the server's first push arrives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::Diagnostic;

#[derive(Clone, Default)]
pub(crate) struct DiagnosticsCache {
    inner: Arc<Mutex<HashMap<PathBuf, Vec<Diagnostic>>>>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<Diagnostic>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the set for `path` wholesale. An empty push is stored as
    /// an empty set; the entry itself is only dropped when the document
    /// closes, so registry and cache leave together.
    pub fn replace(&self, path: PathBuf, items: Vec<Diagnostic>) {
        self.lock().insert(path, items);
    }

    /// The last pushed set for `path`, or empty if none ever arrived.
    pub fn get(&self, path: &Path) -> Vec<Diagnostic> {
        self.lock().get(path).cloned().unwrap_or_default()
    }

    /// Drop the entry for `path` (document closed).
    pub fn remove(&self, path: &Path) {
        self.lock().remove(path);
    }

    /// Drop everything (session stopped).
    pub fn clear(&self) {
        self.lock().clear();
    }
}
