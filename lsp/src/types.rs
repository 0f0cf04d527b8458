//! Public types consumed by embedding applications.
//!
//! The embedder constructs a [`ClientConfig`], receives [`SessionEvent`]s
//! from the channel returned at startup, and gets these result types back
//! from the operation façade. All line/character values are zero-based on
//! the wire and in this API; one-based display conversion belongs to
//! callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one client session.
///
/// Loaded by the embedding application (from env, file, or defaults) and
/// passed in as a plain value.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Executable to spawn. Resolved through `PATH`.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments selecting standard-stream communication.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Budget for the post-handshake readiness probe in milliseconds.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
}

fn default_command() -> String {
    String::from("typescript-language-server")
}

fn default_args() -> Vec<String> {
    vec![String::from("--stdio")]
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_readiness_timeout_ms() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            request_timeout_ms: default_request_timeout_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(crate) fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

/// A zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A location inside a document, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

/// A single edit the server wants applied to a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// Options for document formatting requests.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FormattingOptions {
    #[serde(rename = "tabSize")]
    pub tab_size: u32,
    #[serde(rename = "insertSpaces")]
    pub insert_spaces: bool,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            tab_size: 2,
            insert_spaces: true,
        }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from the wire's numeric severity (1=Error .. 4=Hint).
    ///
    /// Returns `None` for values outside the defined range; the boundary
    /// decides the fallback policy.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic pushed by the server.
///
/// Fields are private; construction happens at the notification boundary
/// and consumers read via accessors.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
    /// Source tag, e.g. "typescript". Resolved to a concrete string at
    /// the boundary.
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        range: Range,
        source: String,
    ) -> Self {
        Self {
            severity,
            message,
            range,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Zero-based range the diagnostic covers.
    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `path:line:col: severity: message`, one-based for display.
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// One completion suggestion.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    /// Numeric completion kind from the wire (1=Text .. 25=TypeParameter).
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    /// Either a plain string or a markup object; exposed as received.
    #[serde(default)]
    pub documentation: Option<serde_json::Value>,
    #[serde(default, rename = "insertText")]
    pub insert_text: Option<String>,
    #[serde(default, rename = "sortText")]
    pub sort_text: Option<String>,
}

/// Hover information at a position.
///
/// `contents` is exposed exactly as the server shaped it; rendering code
/// must handle all three shapes.
#[derive(Debug, Clone, Deserialize)]
pub struct Hover {
    pub contents: HoverContents,
    #[serde(default)]
    pub range: Option<Range>,
}

/// The three content shapes the protocol permits for hover.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HoverContents {
    /// A `{kind, value}` markup object.
    Markup(MarkupContent),
    /// A single marked string (plain or language-fenced).
    Single(MarkedText),
    /// An array of marked strings.
    Many(Vec<MarkedText>),
}

/// A marked string: plain text or a `{language, value}` fenced block.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MarkedText {
    Plain(String),
    Fenced { language: String, value: String },
}

/// Markup content with an explicit kind ("markdown" or "plaintext").
#[derive(Debug, Clone, Deserialize)]
pub struct MarkupContent {
    pub kind: String,
    pub value: String,
}

/// A flat symbol entry, used for both document and workspace symbols.
///
/// Hierarchical responses are flattened to this shape with the parent
/// symbol recorded as `container_name`.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInformation {
    pub name: String,
    /// Numeric symbol kind from the wire (1=File .. 26=TypeParameter).
    pub kind: u32,
    pub location: Location,
    #[serde(default, rename = "containerName")]
    pub container_name: Option<String>,
}

/// Edits the server proposes in response to a rename.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceEdit {
    /// Per-URI text edits.
    #[serde(default)]
    pub changes: Option<HashMap<String, Vec<TextEdit>>>,
    /// Structured document changes, passed through undecoded.
    #[serde(default, rename = "documentChanges")]
    pub document_changes: Option<serde_json::Value>,
}

impl WorkspaceEdit {
    /// Total number of text edits across all files in `changes`.
    #[must_use]
    pub fn edit_count(&self) -> usize {
        self.changes
            .as_ref()
            .map_or(0, |c| c.values().map(Vec::len).sum())
    }
}

/// An event emitted by the session, read from the channel returned at
/// startup. Delivery is best-effort: events are dropped, not awaited,
/// when the consumer falls behind.
#[derive(Debug)]
pub enum SessionEvent {
    /// The diagnostics cache entry for `path` was replaced by a push.
    DiagnosticsUpdated { path: PathBuf },
    /// The session stopped and is no longer usable.
    Stopped { reason: StopReason },
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The process closed its stream (clean exit or explicit stop).
    Exited,
    /// The transport failed mid-session.
    Failed(String),
}
