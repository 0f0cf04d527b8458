//! Typed failures surfaced by every public operation.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::capabilities::Feature;

/// Error taxonomy for the client.
///
/// Operations never leak raw transport failures: the façade wraps each
/// error in [`LspError::Operation`] with the operation name and target
/// before surfacing it. [`LspError::root`] recovers the underlying kind.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// The server process could not spawn or the handshake failed.
    /// Fatal: the session is unusable and a new one must be constructed.
    #[error("language server failed to start: {message}")]
    Startup { message: String },

    /// Operation attempted before the session reached `Ready`.
    /// Recoverable: retry once startup completes.
    #[error("session is not ready")]
    NotReady,

    /// The server did not advertise support for this feature.
    #[error("server does not support {feature}")]
    Unsupported { feature: Feature },

    /// The server process died or the stream closed. All pending
    /// operations fail with this and the session becomes `Stopped`.
    #[error("transport closed")]
    TransportClosed,

    /// A single request exceeded its deadline. Only that operation
    /// fails; the session remains usable.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// The server returned a protocol-level error for this call.
    #[error("server rejected {method}: {message} (code {code})")]
    Rejected {
        method: &'static str,
        code: i64,
        message: String,
    },

    /// A file could not be read from storage.
    #[error("reading {}: {}", path.display(), source)]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server sent a result shape the protocol does not permit.
    #[error("malformed {method} result: {message}")]
    Protocol {
        method: &'static str,
        message: String,
    },

    /// Context wrapper applied by the façade: operation name plus the
    /// file and position (or query) it was invoked with.
    #[error("{operation} failed for {target}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<LspError>,
    },
}

impl LspError {
    /// Wrap this error with the operation name and target it occurred in.
    pub(crate) fn in_operation(self, operation: &'static str, target: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            target: target.into(),
            source: Box::new(self),
        }
    }

    /// The underlying taxonomy entry, with any operation context peeled off.
    #[must_use]
    pub fn root(&self) -> &LspError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}
