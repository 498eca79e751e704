//! Finalize Module for the lx compiler
//!
//! Assembles the runtime result payload handed to the page layer:
//! `{root, lx: {key: {conf, js, snippets}}, plugins, assets}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::asset::{AssetKind, AssetSet};
use crate::error::Result;
use crate::linker::AssetLinker;
use crate::unit::{Diagnostic, DiagnosticKind};

/// Client bootstrap data of one rendered snippet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetPayload {
    pub conf: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    pub js: String,
    /// Keys of the nested snippets rendered from this one.
    pub snippets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPayload {
    pub name: String,
    pub key: String,
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gui_nodes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedAssets {
    pub scripts: Vec<String>,
    pub css: Vec<String>,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimePayload {
    pub root: String,
    pub lx: BTreeMap<String, SnippetPayload>,
    pub plugins: Vec<PluginPayload>,
    pub assets: LinkedAssets,
}

impl RuntimePayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Link every script and stylesheet of `assets`; module names pass through.
/// A path that cannot be linked is dropped and reported.
pub fn link_assets(
    assets: &AssetSet,
    linker: &AssetLinker,
    diagnostics: &mut Vec<Diagnostic>,
) -> LinkedAssets {
    let mut linked = LinkedAssets {
        modules: assets.of_kind(AssetKind::Module),
        ..Default::default()
    };
    for asset in assets.iter() {
        let target = match asset.kind {
            AssetKind::Js => &mut linked.scripts,
            AssetKind::Css => &mut linked.css,
            AssetKind::Module => continue,
        };
        match linker.link(&asset.path) {
            Ok(url) => {
                if !target.contains(&url) {
                    target.push(url);
                }
            }
            Err(e) => {
                tracing::error!("[lx:linker] {}", e);
                diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::Resolution,
                    message: e.to_string(),
                    file: Some(asset.path.clone()),
                });
            }
        }
    }
    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let mut payload = RuntimePayload {
            root: "r".into(),
            ..Default::default()
        };
        payload.lx.insert(
            "r".into(),
            SnippetPayload {
                conf: json!({"a": 1}),
                js: "init()".into(),
                snippets: vec!["x1".into()],
                ..Default::default()
            },
        );
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "root": "r",
                "lx": {"r": {"conf": {"a": 1}, "js": "init()", "snippets": ["x1"]}},
                "plugins": [],
                "assets": {"scripts": [], "css": [], "modules": []}
            })
        );
    }

    #[test]
    fn test_link_assets_splits_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let linker = AssetLinker::new("/web", dir.path());
        let mut assets = AssetSet::new();
        assets.add_js("https://cdn/a.js");
        assets.add_css("http://cdn/a.css");
        assets.add_module("Widgets");
        let mut diagnostics = Vec::new();
        let linked = link_assets(&assets, &linker, &mut diagnostics);
        assert_eq!(linked.scripts, vec!["https://cdn/a.js"]);
        assert_eq!(linked.css, vec!["http://cdn/a.css"]);
        assert_eq!(linked.modules, vec!["Widgets"]);
        assert!(diagnostics.is_empty());
    }
}
