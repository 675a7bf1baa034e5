//! Messages sent from the dev server to HMR runtime clients.
//!
//! The same JSON encoding is used for WebSocket clients and for the
//! supervised Node worker.

use crate::graph::OutputFormat;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reply a worker sends when it cannot apply an update in place.
pub const RESTART_SENTINEL: &str = "restart";

/// Server to client HMR message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HmrMessage {
    /// Re-register the listed modules in place
    Update { assets: Vec<HmrAsset> },
    /// Discard incremental state and reload
    Reload,
    /// The latest build failed
    Error { diagnostics: HmrDiagnostics },
}

impl HmrMessage {
    pub fn is_reload(&self) -> bool {
        matches!(self, Self::Reload)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One changed module inside an `update` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmrAsset {
    /// Public id the client runtime knows the module by
    pub id: String,
    /// Hot asset URL the client can fetch the payload from
    pub url: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Hot payload for JS, empty for other types
    pub output: String,
    pub env_hash: String,
    pub output_format: OutputFormat,
    /// bundle id -> (effective specifier -> resolved public id)
    pub deps_by_bundle: IndexMap<String, IndexMap<String, String>>,
}

/// Build diagnostics rendered for terminals and for HTML overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HmrDiagnostics {
    pub ansi: Vec<RenderedDiagnostic>,
    pub html: Vec<RenderedDiagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedDiagnostic {
    pub message: String,
    pub stack: String,
    pub codeframe: String,
    pub hints: Vec<String>,
    #[serde(default)]
    pub documentation: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reload_wire_format() {
        let json = HmrMessage::Reload.to_json().unwrap();
        assert_eq!(json, r#"{"type":"reload"}"#);
    }

    #[test]
    fn test_update_uses_camel_case_fields() {
        let mut deps = IndexMap::new();
        deps.insert("./dep".to_string(), "x1".to_string());
        let mut by_bundle = IndexMap::new();
        by_bundle.insert("b1".to_string(), deps);

        let msg = HmrMessage::Update {
            assets: vec![HmrAsset {
                id: "a1".into(),
                url: "http://localhost:1234/__parcel_hmr/a1".into(),
                asset_type: "js".into(),
                output: String::new(),
                env_hash: "e1".into(),
                output_format: OutputFormat::Esmodule,
                deps_by_bundle: by_bundle,
            }],
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["assets"][0]["envHash"], "e1");
        assert_eq!(value["assets"][0]["outputFormat"], "esmodule");
        assert_eq!(value["assets"][0]["depsByBundle"], json!({"b1": {"./dep": "x1"}}));
    }
}
