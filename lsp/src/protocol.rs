//! Wire-level message types, parameter builders, and result decoding.
//!
//! The protocol allows several shapes for conceptually one result (single
//! item, array, paged container, null). Each shape is modeled as an
//! untagged union decoded at this boundary, with one normalization
//! function per operation collapsing it to the canonical form the façade
//! returns.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::LspError;
use crate::types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, Location, Position, Range, SymbolInformation,
};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

// ── Parameter builders ─────────────────────────────────────────────────

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": false,
                        "documentationFormat": ["markdown", "plaintext"]
                    }
                },
                "definition": {},
                "references": {},
                "rename": {},
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true
                },
                "formatting": {},
                "signatureHelp": {},
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "workspace": {
                "symbol": { "dynamicRegistration": false }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn position_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

// ── Diagnostics push decoding ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl WireDiagnostic {
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message,
            self.range,
            self.source.unwrap_or_else(|| String::from("unknown")),
        )
    }
}

// ── Result-shape unions and their normalization ────────────────────────

/// `Location | Location[] | null`, the shapes definition and references
/// responses come in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LocationsResponse {
    Many(Vec<Location>),
    One(Location),
    None,
}

impl LocationsResponse {
    /// Collapse to a vector; single becomes one element, null becomes empty.
    pub fn into_vec(self) -> Vec<Location> {
        match self {
            Self::Many(locations) => locations,
            Self::One(location) => vec![location],
            Self::None => Vec::new(),
        }
    }
}

/// `CompletionItem[] | CompletionList | null`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CompletionResponse {
    Flat(Vec<CompletionItem>),
    Paged(CompletionList),
    None,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionList {
    #[serde(default, rename = "isIncomplete")]
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

impl CompletionResponse {
    /// Flatten to a plain item list regardless of paging.
    pub fn into_items(self) -> Vec<CompletionItem> {
        match self {
            Self::Flat(items) => items,
            Self::Paged(list) => list.items,
            Self::None => Vec::new(),
        }
    }
}

/// `SymbolInformation[] | DocumentSymbol[] | null`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentSymbolResponse {
    Flat(Vec<SymbolInformation>),
    Nested(Vec<DocumentSymbol>),
    None,
}

/// Hierarchical symbol as some servers report it.
#[derive(Debug, Deserialize)]
pub(crate) struct DocumentSymbol {
    pub name: String,
    pub kind: u32,
    #[serde(rename = "selectionRange")]
    pub selection_range: Range,
    #[serde(default)]
    pub children: Vec<DocumentSymbol>,
}

impl DocumentSymbolResponse {
    /// Collapse to a flat list, recording each child's parent name.
    pub fn into_flat(self, uri: &str) -> Vec<SymbolInformation> {
        match self {
            Self::Flat(symbols) => symbols,
            Self::Nested(symbols) => {
                let mut flat = Vec::new();
                flatten_symbols(symbols, uri, None, &mut flat);
                flat
            }
            Self::None => Vec::new(),
        }
    }
}

fn flatten_symbols(
    symbols: Vec<DocumentSymbol>,
    uri: &str,
    container: Option<&str>,
    into: &mut Vec<SymbolInformation>,
) {
    for symbol in symbols {
        into.push(SymbolInformation {
            name: symbol.name.clone(),
            kind: symbol.kind,
            location: Location {
                uri: uri.to_string(),
                range: symbol.selection_range,
            },
            container_name: container.map(String::from),
        });
        if !symbol.children.is_empty() {
            flatten_symbols(symbol.children, uri, Some(&symbol.name), into);
        }
    }
}

/// Decode a result that fits `method`'s union, mapping serde failures to
/// a protocol error naming the method.
pub(crate) fn decode<T: DeserializeOwned>(
    method: &'static str,
    value: serde_json::Value,
) -> Result<T, LspError> {
    serde_json::from_value(value).map_err(|e| LspError::Protocol {
        method,
        message: e.to_string(),
    })
}

/// Decode a `T | null` result to an option.
pub(crate) fn decode_nullable<T: DeserializeOwned>(
    method: &'static str,
    value: serde_json::Value,
) -> Result<Option<T>, LspError> {
    if value.is_null() {
        return Ok(None);
    }
    decode(method, value).map(Some)
}

// ── Paths, URIs, language variants ─────────────────────────────────────

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

/// Resolve `.` and `..` components without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Language variant the server should analyze `path` as, from its
/// extension. Unrecognized extensions fall back to plain TypeScript.
pub(crate) fn language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        other => {
            tracing::trace!(?other, "unrecognized extension, treating as typescript");
            "typescript"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: u32) -> Range {
        Range {
            start: Position::new(line, 0),
            end: Position::new(line, 4),
        }
    }

    fn location(uri: &str, line: u32) -> serde_json::Value {
        serde_json::json!({ "uri": uri, "range": span(line) })
    }

    #[test]
    fn request_omits_absent_params() {
        let frame = serde_json::to_value(Request::new(3, "shutdown", None)).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 3);
        assert_eq!(frame["method"], "shutdown");
        assert!(frame.get("params").is_none(), "params must be omitted, not null");
    }

    #[test]
    fn notification_has_no_id() {
        let frame =
            serde_json::to_value(Notification::new("initialized", Some(serde_json::json!({}))))
                .unwrap();
        assert!(frame.get("id").is_none());
        assert_eq!(frame["method"], "initialized");
    }

    #[test]
    fn initialize_params_declare_markdown_hover() {
        let params = initialize_params("file:///workspace");
        assert_eq!(params["rootUri"], "file:///workspace");
        assert!(params["processId"].is_number());
        assert_eq!(
            params["capabilities"]["textDocument"]["hover"]["contentFormat"][0],
            "markdown"
        );
        assert_eq!(
            params["capabilities"]["textDocument"]["documentSymbol"]
                ["hierarchicalDocumentSymbolSupport"],
            true
        );
    }

    #[test]
    fn position_params_are_zero_based_passthrough() {
        let params = position_params("file:///a.ts", Position::new(5, 10));
        assert_eq!(params["position"]["line"], 5);
        assert_eq!(params["position"]["character"], 10);
        assert_eq!(params["textDocument"]["uri"], "file:///a.ts");
    }

    #[test]
    fn locations_response_single_object_becomes_one_element() {
        let parsed: LocationsResponse =
            serde_json::from_value(location("file:///a.ts", 5)).unwrap();
        let locations = parsed.into_vec();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].uri, "file:///a.ts");
    }

    #[test]
    fn locations_response_array_passes_through() {
        let parsed: LocationsResponse = serde_json::from_value(serde_json::json!([
            location("file:///a.ts", 1),
            location("file:///b.ts", 2)
        ]))
        .unwrap();
        assert_eq!(parsed.into_vec().len(), 2);
    }

    #[test]
    fn locations_response_null_becomes_empty() {
        let parsed: LocationsResponse = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(parsed.into_vec().is_empty());
    }

    #[test]
    fn completion_response_flattens_paged_container() {
        let parsed: CompletionResponse = serde_json::from_value(serde_json::json!({
            "isIncomplete": true,
            "items": [ { "label": "a" }, { "label": "b" } ]
        }))
        .unwrap();
        let items = parsed.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "a");
    }

    #[test]
    fn completion_response_accepts_bare_array() {
        let parsed: CompletionResponse =
            serde_json::from_value(serde_json::json!([ { "label": "x" } ])).unwrap();
        assert_eq!(parsed.into_items().len(), 1);
    }

    #[test]
    fn document_symbols_flatten_with_container_names() {
        let parsed: DocumentSymbolResponse = serde_json::from_value(serde_json::json!([
            {
                "name": "MyClass",
                "kind": 5,
                "range": span(0),
                "selectionRange": span(0),
                "children": [
                    { "name": "method", "kind": 6, "range": span(2), "selectionRange": span(2) }
                ]
            }
        ]))
        .unwrap();

        let flat = parsed.into_flat("file:///a.ts");
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].name, "MyClass");
        assert!(flat[0].container_name.is_none());
        assert_eq!(flat[1].name, "method");
        assert_eq!(flat[1].container_name.as_deref(), Some("MyClass"));
        assert_eq!(flat[1].location.uri, "file:///a.ts");
    }

    #[test]
    fn document_symbols_accept_flat_form() {
        let parsed: DocumentSymbolResponse = serde_json::from_value(serde_json::json!([
            {
                "name": "f",
                "kind": 12,
                "location": location("file:///a.ts", 3),
                "containerName": "module"
            }
        ]))
        .unwrap();
        let flat = parsed.into_flat("file:///ignored.ts");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].container_name.as_deref(), Some("module"));
    }

    #[test]
    fn decode_nullable_maps_null_to_none() {
        let none: Option<Location> =
            decode_nullable("textDocument/hover", serde_json::Value::Null).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn decode_reports_method_on_shape_mismatch() {
        let err = decode::<Vec<Location>>("textDocument/references", serde_json::json!(42))
            .unwrap_err();
        match err {
            LspError::Protocol { method, .. } => assert_eq!(method, "textDocument/references"),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn wire_diagnostic_defaults_severity_and_source() {
        let wire: WireDiagnostic = serde_json::from_value(serde_json::json!({
            "range": span(5),
            "message": "some warning"
        }))
        .unwrap();
        let diag = wire.into_diagnostic();
        assert_eq!(diag.severity(), DiagnosticSeverity::Warning);
        assert_eq!(diag.source(), "unknown");
        assert_eq!(diag.range().start.line, 5);
    }

    #[test]
    fn publish_diagnostics_decodes_full_params() {
        let params: PublishDiagnosticsParams = serde_json::from_value(serde_json::json!({
            "uri": "file:///a.ts",
            "diagnostics": [{
                "range": span(0),
                "severity": 1,
                "source": "typescript",
                "message": "cannot find name 'x'"
            }]
        }))
        .unwrap();
        assert_eq!(params.uri, "file:///a.ts");
        let diag = params.diagnostics.into_iter().next().unwrap().into_diagnostic();
        assert!(diag.severity().is_error());
        assert_eq!(diag.source(), "typescript");
    }

    #[test]
    fn path_uri_roundtrip() {
        let path = PathBuf::from("/home/dev/project/src/main.ts");
        let uri = path_to_file_uri(&path).expect("file uri");
        assert_eq!(file_uri_to_path(uri.as_str()), Some(path));
    }

    #[test]
    fn non_file_uri_has_no_path() {
        assert!(file_uri_to_path("https://example.com/a.ts").is_none());
        assert!(file_uri_to_path("not a uri").is_none());
    }

    #[test]
    fn normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/work/./src/../lib/a.ts")),
            PathBuf::from("/work/lib/a.ts")
        );
    }

    #[test]
    fn language_ids_cover_all_variants() {
        assert_eq!(language_id(Path::new("a.ts")), "typescript");
        assert_eq!(language_id(Path::new("a.tsx")), "typescriptreact");
        assert_eq!(language_id(Path::new("a.js")), "javascript");
        assert_eq!(language_id(Path::new("a.mjs")), "javascript");
        assert_eq!(language_id(Path::new("a.jsx")), "javascriptreact");
        assert_eq!(language_id(Path::new("README.md")), "typescript");
    }
}
