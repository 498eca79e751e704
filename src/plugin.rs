//! Plugin Module for the lx compiler
//!
//! Plugin descriptors, the plugin config document, loaded plugin instances
//! and the factory registry that picks per-plugin hooks by key.

use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cache::CacheType;
use crate::error::{read_source, LxError, Result};
use crate::i18n::I18nTable;
use crate::unit::normalize_path;

pub const CONFIG_FILE_NAMES: &[&str] = &["lx-config.yaml", "lx-config.yml", "lx-config.json"];
pub const DEFAULT_ROOT_SNIPPET: &str = "snippets/_root.js";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_key: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            plugin_key: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    pub name: Option<String>,
    pub server: ServerSection,
    pub client: ClientSection,
    pub page: PageSection,
    pub images: Option<String>,
    pub i18n: Vec<String>,
    pub cache_type: CacheType,
    pub require: Vec<String>,
    pub css_assets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSection {
    pub key: Option<String>,
    pub root_snippet: Option<String>,
    pub snippets: Vec<String>,
    pub snippets_map: BTreeMap<String, SnippetMapEntry>,
    pub require: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSection {
    pub file: Option<String>,
    pub require: Vec<String>,
    pub core: Option<String>,
    pub gui_nodes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSection {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub template: Option<PageTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageTemplate {
    pub namespace: Option<String>,
    pub block: Option<String>,
}

/// A `server.snippetsMap` value: a bare path, `{path}`, or a reference into
/// another plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnippetMapEntry {
    Foreign {
        plugin: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        snippet: Option<String>,
    },
    Local {
        path: String,
    },
    Path(String),
}

impl PluginConfig {
    /// Parse a config document; `.json` files as JSON, everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_source(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        Ok(config)
    }

    pub fn root_snippet(&self) -> &str {
        self.server
            .root_snippet
            .as_deref()
            .unwrap_or(DEFAULT_ROOT_SNIPPET)
    }

    /// Server-side modules every snippet of the plugin uses.
    pub fn server_modules(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.server.require.iter().chain(self.require.iter()) {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

/// Locate the config file of a plugin root.
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOOKS AND REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-plugin behaviour selected by the plugin key.
pub trait PluginHooks: Send + Sync {
    /// Adjust the params a plugin's snippets are rendered with.
    fn extend_params(&self, _config: &PluginConfig, _params: &mut serde_json::Map<String, serde_json::Value>) {}

    /// Post-process the html of one rendered snippet.
    fn after_render(&self, _key: &str, _html: &mut String) {}
}

#[derive(Debug, Default)]
pub struct DefaultPlugin;

impl PluginHooks for DefaultPlugin {}

pub type PluginFactory = fn() -> Box<dyn PluginHooks>;

fn default_factory() -> Box<dyn PluginHooks> {
    Box::new(DefaultPlugin)
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(key.into(), factory);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Hooks for `key`; the default variant when nothing is registered.
    pub fn create(&self, key: Option<&str>) -> Box<dyn PluginHooks> {
        match key.and_then(|k| self.factories.get(k)) {
            Some(factory) => factory(),
            None => {
                if let Some(k) = key {
                    tracing::debug!("[lx:plugin] No factory for key {}, using default", k);
                }
                default_factory()
            }
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PluginInstance {
    pub descriptor: PluginDescriptor,
    pub config: PluginConfig,
    root: PathBuf,
    hooks: Box<dyn PluginHooks>,
    i18n: OnceCell<I18nTable>,
}

impl PluginInstance {
    pub fn load(descriptor: &PluginDescriptor, registry: &PluginRegistry) -> Result<Self> {
        let root = PathBuf::from(&descriptor.path);
        let config = match find_config_file(&root) {
            Some(file) => PluginConfig::load(&file)?,
            None => {
                return Err(LxError::Resolution(format!(
                    "plugin {} has no config file in {:?}",
                    descriptor.name, root
                )))
            }
        };
        config.cache_type.ensure_supported()?;

        let key = descriptor
            .plugin_key
            .as_deref()
            .or(config.server.key.as_deref());
        let hooks = registry.create(key);
        tracing::debug!("[lx:plugin] Loaded {} from {:?}", descriptor.name, root);
        Ok(Self {
            descriptor: descriptor.clone(),
            config,
            root,
            hooks,
            i18n: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Constructor key, falling back to the plugin name.
    pub fn key(&self) -> &str {
        self.descriptor
            .plugin_key
            .as_deref()
            .or(self.config.server.key.as_deref())
            .unwrap_or(&self.descriptor.name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the plugin root. Leading `/` is still
    /// plugin-relative.
    pub fn resolve(&self, path: &str) -> PathBuf {
        normalize_path(&self.root.join(path.trim_start_matches('/')))
    }

    pub fn hooks(&self) -> &dyn PluginHooks {
        self.hooks.as_ref()
    }

    /// Translation table merged from every configured file, built on first use.
    pub fn i18n(&self) -> &I18nTable {
        self.i18n.get_or_init(|| {
            let mut table = I18nTable::new();
            for file in &self.config.i18n {
                let path = self.resolve(file);
                match I18nTable::load(&path) {
                    Ok(part) => {
                        for (lang, key) in table.merge(&part) {
                            tracing::warn!(
                                "[lx:plugin] {}: conflicting translation {}:{} in {:?}",
                                self.name(),
                                lang,
                                key,
                                path
                            );
                        }
                    }
                    Err(e) => tracing::warn!("[lx:plugin] {}: {}", self.name(), e),
                }
            }
            table
        })
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("descriptor", &self.descriptor)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_config_sections() {
        let yaml = r#"
server:
  key: shop
  rootSnippet: snippets/main.js
  snippets: [snippets, parts]
  snippetsMap:
    header: snippets/header.js
    footer: { path: snippets/footer.js }
    menu: { plugin: nav, snippet: menu }
page:
  title: Shop
cacheType: none
cssAssets: [css/main.css]
"#;
        let config: PluginConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.key.as_deref(), Some("shop"));
        assert_eq!(config.root_snippet(), "snippets/main.js");
        assert_eq!(
            config.server.snippets_map["header"],
            SnippetMapEntry::Path("snippets/header.js".into())
        );
        assert_eq!(
            config.server.snippets_map["footer"],
            SnippetMapEntry::Local { path: "snippets/footer.js".into() }
        );
        assert!(matches!(
            &config.server.snippets_map["menu"],
            SnippetMapEntry::Foreign { plugin, snippet: Some(s), .. } if plugin == "nav" && s == "menu"
        ));
        assert_eq!(config.page.title.as_deref(), Some("Shop"));
    }

    #[test]
    fn test_unsupported_cache_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lx-config.yaml"), "cacheType: smart\n").unwrap();
        let desc = PluginDescriptor::new("p", dir.path().to_string_lossy());
        let err = PluginInstance::load(&desc, &PluginRegistry::new()).unwrap_err();
        assert!(matches!(err, LxError::UnsupportedCacheMode(ref m) if m == "smart"));
    }

    struct Upper;
    impl PluginHooks for Upper {
        fn after_render(&self, _key: &str, html: &mut String) {
            *html = html.to_uppercase();
        }
    }

    #[test]
    fn test_registry_picks_factory_by_key() {
        let mut registry = PluginRegistry::new();
        registry.register("upper", || Box::new(Upper));

        let mut html = "ok".to_string();
        registry.create(Some("upper")).after_render("k", &mut html);
        assert_eq!(html, "OK");

        let mut html = "ok".to_string();
        registry.create(Some("missing")).after_render("k", &mut html);
        assert_eq!(html, "ok");
    }

    #[test]
    fn test_i18n_merged_lazily() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lx-config.yaml"),
            "i18n: [a.yaml, b.yaml]\nserver:\n  key: k\n",
        )
        .unwrap();
        fs::write(dir.path().join("a.yaml"), "en:\n  hi: Hello\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "en:\n  hi: Hey\n  bye: Bye\n").unwrap();
        let desc = PluginDescriptor::new("p", dir.path().to_string_lossy());
        let plugin = PluginInstance::load(&desc, &PluginRegistry::new()).unwrap();
        assert_eq!(plugin.key(), "k");
        assert_eq!(plugin.i18n().get("en", "hi"), Some("Hello"));
        assert_eq!(plugin.i18n().get("en", "bye"), Some("Bye"));
    }
}
