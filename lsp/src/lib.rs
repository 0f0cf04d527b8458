//! Client core for a TypeScript language server speaking LSP over stdio.
//!
//! [`LspClient`] spawns the external server, performs the handshake,
//! keeps documents open with consistent versions, caches pushed
//! diagnostics, and exposes one method per protocol operation with the
//! result shapes normalized. Requests are pipelined over one transport
//! and correlated by identifier, so callers may overlap freely.

pub mod transport;
pub mod types;

pub(crate) mod capabilities;
pub(crate) mod diagnostics;
pub(crate) mod documents;
pub(crate) mod protocol;
pub(crate) mod rpc;
pub(crate) mod session;

mod client;
mod error;

pub use capabilities::Feature;
pub use client::LspClient;
pub use error::LspError;
pub use session::SessionState;
pub use types::{
    ClientConfig, CompletionItem, Diagnostic, DiagnosticSeverity, FormattingOptions, Hover,
    HoverContents, Location, MarkedText, MarkupContent, Position, Range, SessionEvent, StopReason,
    SymbolInformation, TextEdit, WorkspaceEdit,
};
