//! Registry of documents the server has been told to open.
//!
//! Position-based requests are only valid for open documents, so every
//! operation funnels through [`DocumentRegistry::ensure_open`] first.
//!
//! Staleness contract: the content sent at first open stays authoritative
//! until the document closes. The registry does not watch storage and
//! does not re-read on later operations; callers that know the file
//! changed use [`DocumentRegistry::refresh`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::LspError;
use crate::protocol;
use crate::rpc::Rpc;

struct OpenDocument {
    /// Starts at 1 and bumps on every content-changing notification.
    version: i32,
}

#[derive(Default)]
pub(crate) struct DocumentRegistry {
    // The lock is held across the open notification so two concurrent
    // first operations on one file cannot both send didOpen.
    open: Mutex<HashMap<PathBuf, OpenDocument>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarantee the server has `path` open, returning its URI.
    ///
    /// A tracked document is a no-op; an untracked one is read from
    /// storage and opened at version 1.
    pub async fn ensure_open(&self, rpc: &Rpc, path: &Path) -> Result<url::Url, LspError> {
        let uri = file_uri(path)?;

        let mut open = self.open.lock().await;
        if open.contains_key(path) {
            return Ok(uri);
        }

        let text = read_document(path)?;
        let params =
            protocol::did_open_params(uri.as_str(), protocol::language_id(path), 1, &text);
        rpc.notify("textDocument/didOpen", Some(params)).await?;
        open.insert(path.to_path_buf(), OpenDocument { version: 1 });
        tracing::debug!(path = %path.display(), "opened document");
        Ok(uri)
    }

    /// Re-read `path` and push its current content, bumping the version.
    /// Opens the document if it was not tracked.
    pub async fn refresh(&self, rpc: &Rpc, path: &Path) -> Result<(), LspError> {
        let uri = file_uri(path)?;

        let mut open = self.open.lock().await;
        let text = read_document(path)?;
        match open.get_mut(path) {
            Some(doc) => {
                doc.version += 1;
                let params = protocol::did_change_params(uri.as_str(), doc.version, &text);
                rpc.notify("textDocument/didChange", Some(params)).await?;
            }
            None => {
                let params =
                    protocol::did_open_params(uri.as_str(), protocol::language_id(path), 1, &text);
                rpc.notify("textDocument/didOpen", Some(params)).await?;
                open.insert(path.to_path_buf(), OpenDocument { version: 1 });
            }
        }
        Ok(())
    }

    /// Close `path` if open. Returns whether a close notification was
    /// sent. The local entry is dropped even when the notification fails
    /// on a dead transport.
    pub async fn close(&self, rpc: &Rpc, path: &Path) -> Result<bool, LspError> {
        let mut open = self.open.lock().await;
        if open.remove(path).is_none() {
            return Ok(false);
        }
        let uri = file_uri(path)?;
        rpc.notify(
            "textDocument/didClose",
            Some(protocol::did_close_params(uri.as_str())),
        )
        .await?;
        Ok(true)
    }

    /// Close every open document, returning the paths that were open.
    /// Notification failures are tolerated; the registry empties either
    /// way.
    pub async fn close_all(&self, rpc: &Rpc) -> Vec<PathBuf> {
        let mut open = self.open.lock().await;
        let paths: Vec<PathBuf> = open.drain().map(|(path, _)| path).collect();
        for path in &paths {
            let Ok(uri) = file_uri(path) else { continue };
            let _ = rpc
                .notify(
                    "textDocument/didClose",
                    Some(protocol::did_close_params(uri.as_str())),
                )
                .await;
        }
        paths
    }

    /// Forget all local state without notifying (session stopped).
    pub async fn clear(&self) {
        self.open.lock().await.clear();
    }

    #[cfg(test)]
    pub async fn version(&self, path: &Path) -> Option<i32> {
        self.open.lock().await.get(path).map(|doc| doc.version)
    }

    #[cfg(test)]
    pub async fn is_open(&self, path: &Path) -> bool {
        self.open.lock().await.contains_key(path)
    }
}

fn file_uri(path: &Path) -> Result<url::Url, LspError> {
    protocol::path_to_file_uri(path).map_err(|e| LspError::Storage {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
    })
}

fn read_document(path: &Path) -> Result<String, LspError> {
    fs::read_to_string(path).map_err(|source| LspError::Storage {
        path: path.to_path_buf(),
        source,
    })
}
