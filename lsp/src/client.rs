//! Operation façade: the public API consumed by embedding applications.
//!
//! Every operation follows one template: verify the session is ready,
//! verify the server advertised the capability, make sure the document is
//! open, issue one correlated request, and normalize the result shape.
//! Failures come back wrapped with the operation name and target.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::capabilities::Feature;
use crate::diagnostics::DiagnosticsCache;
use crate::documents::DocumentRegistry;
use crate::error::LspError;
use crate::protocol::{
    self, CompletionResponse, DocumentSymbolResponse, LocationsResponse, PublishDiagnosticsParams,
    WireDiagnostic,
};
use crate::rpc::NotificationRouter;
use crate::session::{Session, SessionState};
use crate::types::{
    ClientConfig, CompletionItem, Diagnostic, FormattingOptions, Hover, Location, Position,
    SessionEvent, SymbolInformation, TextEdit, WorkspaceEdit,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Client for one language server session over one workspace root.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and may be
/// called concurrently. A stopped client is not reusable; construct a
/// new one.
pub struct LspClient {
    session: Arc<Session>,
    documents: DocumentRegistry,
    diagnostics: DiagnosticsCache,
}

impl LspClient {
    /// Spawn the configured server, perform the handshake and readiness
    /// probe, and return a `Ready` client plus the event channel.
    ///
    /// Fails with [`LspError::Startup`] when the process cannot spawn or
    /// the handshake fails; the probe timing out is non-fatal.
    pub async fn start(
        config: ClientConfig,
        workspace_root: &Path,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), LspError> {
        let (router, diagnostics, event_tx, event_rx) = Self::prepare(workspace_root);
        let session = Session::spawn(&config, workspace_root, router, event_tx)?;
        let client = Self::from_parts(session, diagnostics);
        if let Err(e) = client.initialize().await {
            client.session.stop().await;
            return Err(e);
        }
        Ok((client, event_rx))
    }

    /// Wire a client over arbitrary async streams instead of a spawned
    /// process. The client starts `Initializing`; drive it to `Ready`
    /// with [`LspClient::initialize`]. Must be called from within a
    /// tokio runtime; the transport tasks are spawned here.
    pub fn connect<R, W>(
        reader: R,
        writer: W,
        config: ClientConfig,
        workspace_root: &Path,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (router, diagnostics, event_tx, event_rx) = Self::prepare(workspace_root);
        let session =
            Session::connect(reader, writer, &config, workspace_root, router, event_tx)?;
        Ok((Self::from_parts(session, diagnostics), event_rx))
    }

    /// Event channel, diagnostics cache, and a router with the
    /// diagnostics handler installed. Registration happens before the
    /// handshake: servers may push diagnostics the moment they see
    /// didOpen.
    fn prepare(
        workspace_root: &Path,
    ) -> (
        NotificationRouter,
        DiagnosticsCache,
        mpsc::Sender<SessionEvent>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let diagnostics = DiagnosticsCache::new();
        let router = NotificationRouter::new();
        install_diagnostics_handler(&router, diagnostics.clone(), workspace_root, event_tx.clone());
        (router, diagnostics, event_tx, event_rx)
    }

    fn from_parts(session: Session, diagnostics: DiagnosticsCache) -> Self {
        Self {
            session: Arc::new(session),
            documents: DocumentRegistry::new(),
            diagnostics,
        }
    }

    /// Handshake plus readiness probe. Call exactly once on a client
    /// obtained from [`LspClient::connect`]; [`LspClient::start`] already
    /// does this.
    pub async fn initialize(&self) -> Result<(), LspError> {
        self.session.initialize().await
    }

    /// Where the session is in its lifecycle.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether the server advertised `feature`. False before the
    /// handshake completes, a pure snapshot lookup afterwards.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        self.session.supports(feature)
    }

    /// Hover information at a position. `None` when the server has
    /// nothing to show.
    pub async fn hover(&self, path: &Path, position: Position) -> Result<Option<Hover>, LspError> {
        let inner = async {
            let uri = self.open_for(Feature::Hover, path).await?;
            let result = self
                .session
                .request(
                    "textDocument/hover",
                    Some(protocol::position_params(uri.as_str(), position)),
                )
                .await?;
            protocol::decode_nullable("textDocument/hover", result)
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("hover", position_target(path, position)))
    }

    /// Definition locations for the symbol at a position. Single
    /// locations and null both normalize to a vector.
    pub async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<Location>, LspError> {
        self.locations_at(Feature::Definition, "textDocument/definition", path, position, None)
            .await
            .map_err(|e| e.in_operation("definition", position_target(path, position)))
    }

    /// All references to the symbol at a position.
    pub async fn references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, LspError> {
        let context = serde_json::json!({ "includeDeclaration": include_declaration });
        self.locations_at(
            Feature::References,
            "textDocument/references",
            path,
            position,
            Some(context),
        )
        .await
        .map_err(|e| e.in_operation("references", position_target(path, position)))
    }

    async fn locations_at(
        &self,
        feature: Feature,
        method: &'static str,
        path: &Path,
        position: Position,
        context: Option<serde_json::Value>,
    ) -> Result<Vec<Location>, LspError> {
        let uri = self.open_for(feature, path).await?;
        let mut params = protocol::position_params(uri.as_str(), position);
        if let Some(context) = context {
            params["context"] = context;
        }
        let result = self.session.request(method, Some(params)).await?;
        Ok(protocol::decode::<LocationsResponse>(method, result)?.into_vec())
    }

    /// Completion suggestions at a position, truncated to `limit`
    /// regardless of how many the server returned.
    pub async fn completion(
        &self,
        path: &Path,
        position: Position,
        limit: usize,
    ) -> Result<Vec<CompletionItem>, LspError> {
        let inner = async {
            let uri = self.open_for(Feature::Completion, path).await?;
            let result = self
                .session
                .request(
                    "textDocument/completion",
                    Some(protocol::position_params(uri.as_str(), position)),
                )
                .await?;
            let mut items =
                protocol::decode::<CompletionResponse>("textDocument/completion", result)?
                    .into_items();
            items.truncate(limit);
            Ok(items)
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("completion", position_target(path, position)))
    }

    /// Rename the symbol at a position.
    ///
    /// Returns `None` both when the server reports nothing to rename and
    /// when it rejects the call outright; some servers advertise rename
    /// support yet reject specific positions, and that is an absence, not
    /// an error.
    pub async fn rename(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
    ) -> Result<Option<WorkspaceEdit>, LspError> {
        let inner = async {
            let uri = self.open_for(Feature::Rename, path).await?;
            let mut params = protocol::position_params(uri.as_str(), position);
            params["newName"] = serde_json::Value::String(new_name.to_string());
            match self.session.request("textDocument/rename", Some(params)).await {
                Ok(result) => protocol::decode_nullable("textDocument/rename", result),
                Err(LspError::Rejected { code, message, .. }) => {
                    tracing::debug!(code, %message, "server rejected rename, reporting no edit");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("rename", position_target(path, position)))
    }

    /// Whole-document formatting edits. Empty when the server has none.
    pub async fn format_document(
        &self,
        path: &Path,
        options: FormattingOptions,
    ) -> Result<Vec<TextEdit>, LspError> {
        let inner = async {
            let uri = self.open_for(Feature::Formatting, path).await?;
            let params = serde_json::json!({
                "textDocument": { "uri": uri.as_str() },
                "options": options
            });
            let result = self
                .session
                .request("textDocument/formatting", Some(params))
                .await?;
            Ok(
                protocol::decode_nullable::<Vec<TextEdit>>("textDocument/formatting", result)?
                    .unwrap_or_default(),
            )
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("format", path.display().to_string()))
    }

    /// Symbols declared in one document, flattened when the server
    /// responds hierarchically.
    pub async fn document_symbols(
        &self,
        path: &Path,
    ) -> Result<Vec<SymbolInformation>, LspError> {
        let inner = async {
            let uri = self.open_for(Feature::DocumentSymbol, path).await?;
            let params = serde_json::json!({ "textDocument": { "uri": uri.as_str() } });
            let result = self
                .session
                .request("textDocument/documentSymbol", Some(params))
                .await?;
            Ok(
                protocol::decode::<DocumentSymbolResponse>("textDocument/documentSymbol", result)?
                    .into_flat(uri.as_str()),
            )
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("document-symbols", path.display().to_string()))
    }

    /// Workspace-wide symbol search. Needs no open document.
    pub async fn workspace_symbols(
        &self,
        query: &str,
    ) -> Result<Vec<SymbolInformation>, LspError> {
        let inner = async {
            self.session.require_ready()?;
            if !self.session.supports(Feature::WorkspaceSymbol) {
                return Err(LspError::Unsupported {
                    feature: Feature::WorkspaceSymbol,
                });
            }
            let result = self
                .session
                .request(
                    "workspace/symbol",
                    Some(serde_json::json!({ "query": query })),
                )
                .await?;
            Ok(
                protocol::decode_nullable::<Vec<SymbolInformation>>("workspace/symbol", result)?
                    .unwrap_or_default(),
            )
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("workspace-symbols", query.to_string()))
    }

    /// The last diagnostics the server pushed for `path`, or empty if it
    /// never pushed any. A local read; never a request.
    #[must_use]
    pub fn diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        self.diagnostics.get(path)
    }

    /// Re-read `path` from storage and push its current content to the
    /// server, bumping the document version. The escape hatch from the
    /// registry's read-once staleness contract.
    pub async fn refresh(&self, path: &Path) -> Result<(), LspError> {
        let inner = async {
            self.session.require_ready()?;
            self.documents.refresh(self.session.rpc(), path).await
        };
        inner
            .await
            .map_err(|e: LspError| e.in_operation("refresh", path.display().to_string()))
    }

    /// Close `path` with the server and drop its registry and diagnostics
    /// entries together. A later operation re-opens it with a fresh read.
    pub async fn close_document(&self, path: &Path) -> Result<(), LspError> {
        let result = self.documents.close(self.session.rpc(), path).await;
        self.diagnostics.remove(path);
        match result {
            // A dead transport cannot be notified, but the local entries
            // are gone either way.
            Ok(_) | Err(LspError::TransportClosed) => Ok(()),
            Err(e) => Err(e.in_operation("close", path.display().to_string())),
        }
    }

    /// Close every open document.
    pub async fn close_all(&self) {
        let closed = self.documents.close_all(self.session.rpc()).await;
        for path in closed {
            self.diagnostics.remove(&path);
        }
    }

    /// Stop the session and clear all document and diagnostic state.
    /// Idempotent; in-flight operations fail with `TransportClosed`.
    pub async fn stop(&self) {
        self.session.stop().await;
        self.documents.clear().await;
        self.diagnostics.clear();
    }

    /// Shared preamble: ready check, capability check, ensure-open.
    async fn open_for(&self, feature: Feature, path: &Path) -> Result<url::Url, LspError> {
        self.session.require_ready()?;
        if !self.session.supports(feature) {
            return Err(LspError::Unsupported { feature });
        }
        self.documents.ensure_open(self.session.rpc(), path).await
    }
}

fn position_target(path: &Path, position: Position) -> String {
    format!("{}:{}:{}", path.display(), position.line, position.character)
}

/// Decode diagnostic pushes into the cache, scoped to the workspace.
fn install_diagnostics_handler(
    router: &NotificationRouter,
    cache: DiagnosticsCache,
    workspace_root: &Path,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let root = protocol::normalize_path(workspace_root);
    router.on("textDocument/publishDiagnostics", move |params| {
        let parsed: PublishDiagnosticsParams = match serde_json::from_value(params) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable publishDiagnostics push");
                return;
            }
        };
        let Some(path) = protocol::file_uri_to_path(&parsed.uri) else {
            tracing::trace!(uri = %parsed.uri, "diagnostics for non-file uri");
            return;
        };
        if !protocol::normalize_path(&path).starts_with(&root) {
            tracing::warn!(
                path = %path.display(),
                "ignoring diagnostics for path outside the workspace"
            );
            return;
        }
        let items: Vec<Diagnostic> = parsed
            .diagnostics
            .into_iter()
            .map(WireDiagnostic::into_diagnostic)
            .collect();
        tracing::debug!(path = %path.display(), count = items.len(), "diagnostics updated");
        cache.replace(path.clone(), items);
        if event_tx
            .try_send(SessionEvent::DiagnosticsUpdated { path })
            .is_err()
        {
            tracing::trace!("dropping diagnostics event, consumer is gone or behind");
        }
    });
}
