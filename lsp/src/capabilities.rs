//! Negotiated server capabilities.

use std::collections::HashSet;
use std::fmt;

/// A feature the server may advertise during the handshake.
///
/// `Diagnostics` is the exception: diagnostics are push-based with no
/// capability bit, so they count as supported on every session that
/// completed the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Hover,
    Completion,
    Definition,
    References,
    Rename,
    DocumentSymbol,
    WorkspaceSymbol,
    CodeAction,
    Formatting,
    RangeFormatting,
    SignatureHelp,
    Diagnostics,
}

impl Feature {
    pub const ALL: [Feature; 12] = [
        Feature::Hover,
        Feature::Completion,
        Feature::Definition,
        Feature::References,
        Feature::Rename,
        Feature::DocumentSymbol,
        Feature::WorkspaceSymbol,
        Feature::CodeAction,
        Feature::Formatting,
        Feature::RangeFormatting,
        Feature::SignatureHelp,
        Feature::Diagnostics,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::Completion => "completion",
            Self::Definition => "definition",
            Self::References => "references",
            Self::Rename => "rename",
            Self::DocumentSymbol => "document-symbol",
            Self::WorkspaceSymbol => "workspace-symbol",
            Self::CodeAction => "code-action",
            Self::Formatting => "formatting",
            Self::RangeFormatting => "range-formatting",
            Self::SignatureHelp => "signature-help",
            Self::Diagnostics => "diagnostics",
        }
    }

    /// Key under `capabilities` in the initialize result, or `None` for
    /// features that are always on.
    fn provider_key(self) -> Option<&'static str> {
        match self {
            Self::Hover => Some("hoverProvider"),
            Self::Completion => Some("completionProvider"),
            Self::Definition => Some("definitionProvider"),
            Self::References => Some("referencesProvider"),
            Self::Rename => Some("renameProvider"),
            Self::DocumentSymbol => Some("documentSymbolProvider"),
            Self::WorkspaceSymbol => Some("workspaceSymbolProvider"),
            Self::CodeAction => Some("codeActionProvider"),
            Self::Formatting => Some("documentFormattingProvider"),
            Self::RangeFormatting => Some("documentRangeFormattingProvider"),
            Self::SignatureHelp => Some("signatureHelpProvider"),
            Self::Diagnostics => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable snapshot of what the server advertised, captured once when
/// the handshake completes.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapabilitySet {
    supported: HashSet<Feature>,
}

impl CapabilitySet {
    /// Snapshot the `capabilities` object of an initialize result.
    ///
    /// Providers are advertised as a boolean or an options object; any
    /// non-false, non-absent value counts as support.
    pub fn from_initialize(result: &serde_json::Value) -> Self {
        let capabilities = &result["capabilities"];
        let mut supported = HashSet::new();
        for feature in Feature::ALL {
            let advertised = match feature.provider_key() {
                None => true,
                Some(key) => provider_enabled(&capabilities[key]),
            };
            if advertised {
                supported.insert(feature);
            }
        }
        Self { supported }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.supported.contains(&feature)
    }
}

fn provider_enabled(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(enabled) => *enabled,
        serde_json::Value::Null => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_of_typical_server() {
        let set = CapabilitySet::from_initialize(&serde_json::json!({
            "capabilities": {
                "hoverProvider": true,
                "completionProvider": { "triggerCharacters": ["."] },
                "definitionProvider": true,
                "referencesProvider": true,
                "renameProvider": { "prepareProvider": true },
                "documentSymbolProvider": true,
                "workspaceSymbolProvider": true,
                "documentFormattingProvider": false
            }
        }));

        assert!(set.supports(Feature::Hover));
        assert!(set.supports(Feature::Completion), "object provider counts");
        assert!(set.supports(Feature::Rename), "object provider counts");
        assert!(!set.supports(Feature::Formatting), "false is not support");
        assert!(!set.supports(Feature::CodeAction), "absent is not support");
        assert!(set.supports(Feature::Diagnostics), "always on");
    }

    #[test]
    fn empty_capabilities_support_only_diagnostics() {
        let set = CapabilitySet::from_initialize(&serde_json::json!({ "capabilities": {} }));
        for feature in Feature::ALL {
            assert_eq!(set.supports(feature), feature == Feature::Diagnostics);
        }
    }

    #[test]
    fn default_set_supports_nothing() {
        let set = CapabilitySet::default();
        assert!(!set.supports(Feature::Diagnostics));
    }

    #[test]
    fn labels_are_kebab_case() {
        assert_eq!(Feature::WorkspaceSymbol.label(), "workspace-symbol");
        assert_eq!(Feature::RangeFormatting.to_string(), "range-formatting");
    }
}
