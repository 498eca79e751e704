//! Plugin/snippet renderer.
//!
//! A plugin's root snippet is compiled for the server, executed in the
//! sandbox, and every nested snippet or sub-plugin it reports is rendered the
//! same way. The resulting fragments are composed into one page body and the
//! client payload of every node is collected for the page layer.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::asset::AssetSet;
use crate::compiler::{is_remote, CompilerOptions, DirectiveCompiler};
use crate::discovery::{ModuleMap, PluginMap};
use crate::error::{read_source, LxError, Result};
use crate::finalize::{link_assets, PluginPayload, RuntimePayload, SnippetPayload};
use crate::fragment::Fragment;
use crate::linker::AssetLinker;
use crate::parse::WidgetRegistry;
use crate::plugin::{
    find_config_file, PluginConfig, PluginDescriptor, PluginInstance, PluginRegistry,
    SnippetMapEntry,
};
use crate::sandbox::Sandbox;
use crate::unit::{canonical_path, CompileUnit, Context, Diagnostic, DiagnosticKind};

lazy_static! {
    static ref CLIENT_BLOCK_RE: Regex =
        Regex::new(r"(?si)@lx:<context\s+client\s*:(.*?)@lx:context>").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Client-side part of a rendered snippet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientPayload {
    pub self_conf: Value,
    pub data: Value,
    pub lx_elements: Vec<Value>,
    pub js: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnippetInstance {
    pub key: String,
    pub parent: Option<String>,
    pub params: Map<String, Value>,
    /// The snippet's own html, before children are spliced in.
    pub html: String,
    pub client: ClientPayload,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub title: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub root_key: String,
    /// Composed html of every node; the root entry is the page body.
    pub html_by_key: BTreeMap<String, String>,
    pub payload: RuntimePayload,
    pub page: PageInfo,
    pub snippets: Vec<SnippetInstance>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RenderOutput {
    pub fn body(&self) -> &str {
        self.html_by_key
            .get(&self.root_key)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Return value of a server snippet script.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SnippetResult {
    html: Option<String>,
    js: Option<String>,
    data: Value,
    #[serde(rename = "self")]
    self_conf: Value,
    lx_elements: Vec<Value>,
    sub_plugins: Vec<SubPluginRef>,
}

#[derive(Debug, Deserialize)]
struct SubPluginRef {
    name: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SnippetRef {
    path: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Default)]
struct RenderState {
    nodes: Vec<SnippetInstance>,
    keys: HashSet<String>,
    next_id: usize,
    payload: RuntimePayload,
    assets: AssetSet,
    diagnostics: Vec<Diagnostic>,
    /// Canonical snippet files currently being rendered, outermost first.
    ancestry: Vec<PathBuf>,
    /// Plugin names currently being rendered, outermost first.
    plugin_stack: Vec<String>,
}

impl RenderState {
    fn report(&mut self, kind: DiagnosticKind, file: Option<&Path>, message: impl Into<String>) {
        let message = message.into();
        let file = file.map(|p| p.to_string_lossy().to_string());
        tracing::error!(file = ?file, "[lx:renderer] {}", message);
        self.diagnostics.push(Diagnostic { kind, message, file });
    }

    /// Reserve `requested`, or generate a fresh `lx-N` key.
    fn claim_key(&mut self, requested: Option<String>) -> Option<String> {
        match requested {
            Some(key) if self.keys.contains(&key) => {
                self.report(
                    DiagnosticKind::Resolution,
                    None,
                    format!("duplicate snippet key '{}'", key),
                );
                None
            }
            Some(key) => {
                self.keys.insert(key.clone());
                Some(key)
            }
            None => loop {
                self.next_id += 1;
                let key = format!("lx-{}", self.next_id);
                if self.keys.insert(key.clone()) {
                    break Some(key);
                }
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Renderer<'a> {
    compiler: DirectiveCompiler<'a>,
    plugins: &'a PluginMap,
    registry: PluginRegistry,
    sandbox: &'a Sandbox,
    linker: &'a AssetLinker,
    mode: String,
}

impl<'a> Renderer<'a> {
    pub fn new(
        modules: &'a ModuleMap,
        plugins: &'a PluginMap,
        sandbox: &'a Sandbox,
        linker: &'a AssetLinker,
    ) -> Self {
        Self {
            compiler: DirectiveCompiler::new(modules),
            plugins,
            registry: PluginRegistry::new(),
            sandbox,
            linker,
            mode: "dev".to_string(),
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_compiler_options(mut self, options: CompilerOptions) -> Self {
        self.compiler = self.compiler.with_options(options);
        self
    }

    /// Replace the widget registry used for embedded templates.
    pub fn with_widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.compiler = self.compiler.with_widgets(widgets);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn render(&self, descriptor: &PluginDescriptor, lang: &str) -> Result<RenderOutput> {
        let plugin = PluginInstance::load(descriptor, &self.registry)?;
        let mut state = RenderState::default();

        let Some(root_key) = self.render_plugin(&plugin, Map::new(), None, None, lang, &mut state)? else {
            return Err(LxError::Resolution(format!(
                "root snippet of plugin {} failed to render",
                plugin.name()
            )));
        };

        let page = PageInfo {
            title: plugin.config.page.title.clone(),
            icon: plugin
                .config
                .page
                .icon
                .as_deref()
                .and_then(|icon| self.link_or_report(&resolve_asset(&plugin, icon), &mut state)),
        };

        let mut html_by_key = BTreeMap::new();
        compose(&root_key, &state.nodes, &mut html_by_key);

        let mut payload = std::mem::take(&mut state.payload);
        payload.root = root_key.clone();
        payload.assets = link_assets(&state.assets, self.linker, &mut state.diagnostics);

        tracing::info!(
            "[lx:renderer] Rendered {} ({} snippets, {} diagnostics)",
            plugin.name(),
            state.nodes.len(),
            state.diagnostics.len()
        );
        Ok(RenderOutput {
            root_key,
            html_by_key,
            payload,
            page,
            snippets: state.nodes,
            diagnostics: state.diagnostics,
        })
    }

    fn render_plugin(
        &self,
        plugin: &PluginInstance,
        mut params: Map<String, Value>,
        key: Option<String>,
        parent: Option<&str>,
        lang: &str,
        state: &mut RenderState,
    ) -> Result<Option<String>> {
        plugin.hooks().extend_params(&plugin.config, &mut params);
        self.collect_plugin_assets(plugin, &mut state.assets);

        let Some(key) = state.claim_key(key) else {
            return Ok(None);
        };
        let file = plugin.resolve(plugin.config.root_snippet());
        state.plugin_stack.push(plugin.name().to_string());
        let rendered = self.render_snippet(plugin, &file, &key, params, parent, lang, state);
        state.plugin_stack.pop();
        if !rendered? {
            return Ok(None);
        }
        state.payload.plugins.push(PluginPayload {
            name: plugin.name().to_string(),
            key: plugin.key().to_string(),
            root: key.clone(),
            gui_nodes: plugin.config.client.gui_nodes.clone(),
        });
        Ok(Some(key))
    }

    fn collect_plugin_assets(&self, plugin: &PluginInstance, assets: &mut AssetSet) {
        let client = &plugin.config.client;
        for path in client.core.iter().chain(client.file.iter()) {
            assets.add_js(resolve_asset(plugin, path));
        }
        for css in &plugin.config.css_assets {
            assets.add_css(resolve_asset(plugin, css));
        }
        for module in &client.require {
            assets.add_module(module.clone());
        }
    }

    /// Render one snippet and, recursively, everything it references.
    /// Returns false when the snippet was skipped.
    #[allow(clippy::too_many_arguments)]
    fn render_snippet(
        &self,
        plugin: &PluginInstance,
        file: &Path,
        key: &str,
        params: Map<String, Value>,
        parent: Option<&str>,
        lang: &str,
        state: &mut RenderState,
    ) -> Result<bool> {
        state.ancestry.push(canonical_path(file));
        let rendered = self.render_node(plugin, file, key, params, parent, lang, state);
        state.ancestry.pop();
        rendered
    }

    #[allow(clippy::too_many_arguments)]
    fn render_node(
        &self,
        plugin: &PluginInstance,
        file: &Path,
        key: &str,
        params: Map<String, Value>,
        parent: Option<&str>,
        lang: &str,
        state: &mut RenderState,
    ) -> Result<bool> {
        tracing::debug!("[lx:renderer] Snippet {} from {:?}", key, file);
        let source = match read_source(file) {
            Ok(s) => s,
            Err(e) => {
                state.report(DiagnosticKind::Resolution, Some(file), e.to_string());
                return Ok(false);
            }
        };

        let mut unit = CompileUnit::from_file(file, Context::Server)
            .with_language(lang)
            .with_mode(&self.mode);
        unit.plugin_i18n = Some(plugin.i18n().clone());
        unit.use_modules = plugin.config.server_modules();
        let script = match self.compiler.compile(&mut unit) {
            Ok(script) => script,
            Err(e @ LxError::Infrastructure(_)) => return Err(e),
            Err(e) => {
                state.diagnostics.append(&mut unit.diagnostics);
                state.report(DiagnosticKind::Structural, Some(file), e.to_string());
                return Ok(false);
            }
        };
        state.diagnostics.append(&mut unit.diagnostics);
        state.assets.merge(&unit.assets);

        let images = plugin
            .config
            .images
            .as_deref()
            .and_then(|dir| self.link_or_report(&resolve_asset(plugin, dir), state));
        let mut seed = Map::new();
        seed.insert(
            "Plugin".to_string(),
            json!({
                "name": plugin.name(),
                "key": plugin.key(),
                "params": Value::Object(params.clone()),
                "images": images,
            }),
        );
        seed.insert(
            "Snippet".to_string(),
            json!({ "key": key, "params": Value::Object(params.clone()) }),
        );

        let result = self.sandbox.execute_with_seed(&script, &seed)?;
        for (category, messages) in &result.errors {
            for msg in messages {
                tracing::warn!("[lx:renderer] {} [{}] {}", key, category, msg);
            }
        }
        if let Some(fatal) = result.fatal {
            state.report(DiagnosticKind::Execution, Some(file), fatal);
            return Ok(false);
        }
        let output: SnippetResult = match result.return_value {
            Value::Null => SnippetResult::default(),
            value => match serde_json::from_value(value) {
                Ok(out) => out,
                Err(e) => {
                    state.report(
                        DiagnosticKind::Execution,
                        Some(file),
                        format!("malformed snippet result: {}", e),
                    );
                    return Ok(false);
                }
            },
        };

        let mut html = output.html.unwrap_or_default();
        plugin.hooks().after_render(key, &mut html);

        let client_js = self.compile_client(plugin, file, &source, lang, state);
        let js: Vec<String> = [client_js, output.js.unwrap_or_default()]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();

        let node_index = state.nodes.len();
        state.nodes.push(SnippetInstance {
            key: key.to_string(),
            parent: parent.map(str::to_string),
            params,
            html,
            client: ClientPayload {
                self_conf: output.self_conf,
                data: output.data,
                lx_elements: output.lx_elements.clone(),
                js: js.join("\n"),
            },
        });

        let mut children = Vec::new();
        let mut elements = Vec::new();
        for element in output.lx_elements {
            let Some(reference) = element.get("snippet") else {
                elements.push(element);
                continue;
            };
            let reference: SnippetRef = match serde_json::from_value(reference.clone()) {
                Ok(r) => r,
                Err(e) => {
                    state.report(DiagnosticKind::Resolution, Some(file), format!("bad snippet reference: {}", e));
                    continue;
                }
            };
            let requested = reference
                .key
                .clone()
                .or_else(|| element.get("key").and_then(Value::as_str).map(str::to_string));
            let child_file = match self.resolve_snippet(plugin, file, &reference.path) {
                Ok(f) => f,
                Err(msg) => {
                    state.report(DiagnosticKind::Resolution, Some(file), msg);
                    continue;
                }
            };
            if state.ancestry.contains(&child_file) {
                state.report(
                    DiagnosticKind::Resolution,
                    Some(file),
                    format!("snippet cycle through {:?}", child_file),
                );
                continue;
            }
            let Some(child_key) = state.claim_key(requested) else {
                continue;
            };
            if self.render_snippet(plugin, &child_file, &child_key, reference.params, Some(key), lang, state)? {
                children.push(child_key);
            }
        }

        for sub in output.sub_plugins {
            if state.plugin_stack.contains(&sub.name) {
                let chain = state.plugin_stack.join(" -> ");
                state.report(
                    DiagnosticKind::Resolution,
                    Some(file),
                    format!("plugin cycle through {} ({})", sub.name, chain),
                );
                continue;
            }
            let Some(desc) = self.plugins.get(&sub.name) else {
                state.report(DiagnosticKind::Resolution, Some(file), format!("plugin {} not found", sub.name));
                continue;
            };
            let child = match PluginInstance::load(&desc, &self.registry) {
                Ok(p) => p,
                Err(e) => {
                    state.report(DiagnosticKind::Resolution, Some(file), e.to_string());
                    continue;
                }
            };
            if let Some(child_key) = self.render_plugin(&child, sub.params, sub.key, Some(key), lang, state)? {
                children.push(child_key);
            }
        }

        let client = &state.nodes[node_index].client;
        state.payload.lx.insert(
            key.to_string(),
            SnippetPayload {
                conf: client.self_conf.clone(),
                data: client.data.clone(),
                js: client.js.clone(),
                snippets: children,
                elements,
            },
        );
        Ok(true)
    }

    /// Client code of a snippet: its CLIENT context blocks compiled with
    /// module building deferred to the page.
    fn compile_client(
        &self,
        plugin: &PluginInstance,
        file: &Path,
        source: &str,
        lang: &str,
        state: &mut RenderState,
    ) -> String {
        let blocks: Vec<&str> = CLIENT_BLOCK_RE
            .captures_iter(source)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if blocks.is_empty() {
            return String::new();
        }
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut unit = CompileUnit::from_code(blocks.join("\n"), Context::Client)
            .with_base_dir(dir)
            .with_language(lang)
            .with_mode(&self.mode);
        unit.build_modules = false;
        unit.plugin_i18n = Some(plugin.i18n().clone());
        let compiled = self.compiler.compile(&mut unit);
        state.diagnostics.append(&mut unit.diagnostics);
        match compiled {
            Ok(js) => {
                state.assets.merge(&unit.assets);
                js
            }
            Err(e) => {
                state.report(DiagnosticKind::Structural, Some(file), e.to_string());
                String::new()
            }
        }
    }

    /// Snippet directories, then the snippets map, then the parent's
    /// directory. Exactly one distinct match is accepted.
    fn resolve_snippet(
        &self,
        plugin: &PluginInstance,
        parent_file: &Path,
        path: &str,
    ) -> std::result::Result<PathBuf, String> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        let mut consider = |candidate: PathBuf| {
            let candidate = with_default_extension(candidate);
            if candidate.is_file() {
                let canonical = canonical_path(&candidate);
                if !candidates.contains(&canonical) {
                    candidates.push(canonical);
                }
            }
        };

        for dir in &plugin.config.server.snippets {
            consider(plugin.resolve(dir).join(path));
        }
        match plugin.config.server.snippets_map.get(path) {
            Some(SnippetMapEntry::Path(p)) | Some(SnippetMapEntry::Local { path: p }) => {
                consider(plugin.resolve(p))
            }
            Some(SnippetMapEntry::Foreign { plugin: name, path: p, snippet }) => {
                if let Some(found) = self.foreign_snippet(name, p.as_deref(), snippet.as_deref()) {
                    consider(found);
                }
            }
            None => {}
        }
        if let Some(dir) = parent_file.parent() {
            consider(dir.join(path));
        }

        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(format!("snippet '{}' not found", path)),
            n => Err(format!("snippet '{}' is ambiguous ({} matches)", path, n)),
        }
    }

    fn foreign_snippet(&self, plugin: &str, path: Option<&str>, snippet: Option<&str>) -> Option<PathBuf> {
        let desc = self.plugins.get(plugin)?;
        let root = PathBuf::from(&desc.path);
        if let Some(path) = path {
            return Some(root.join(path));
        }
        let snippet = snippet?;
        let config = find_config_file(&root)
            .and_then(|f| PluginConfig::load(&f).ok())
            .unwrap_or_default();
        let mut dirs = config.server.snippets;
        if dirs.is_empty() {
            dirs.push("snippets".to_string());
        }
        dirs.iter()
            .map(|d| with_default_extension(root.join(d).join(snippet)))
            .find(|p| p.is_file())
    }

    fn link_or_report(&self, path: &str, state: &mut RenderState) -> Option<String> {
        match self.linker.link(path) {
            Ok(url) => Some(url),
            Err(e) => {
                state.report(DiagnosticKind::Resolution, None, e.to_string());
                None
            }
        }
    }
}

fn with_default_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("js")
    }
}

fn resolve_asset(plugin: &PluginInstance, path: &str) -> String {
    if is_remote(path) {
        path.to_string()
    } else {
        plugin.resolve(path).to_string_lossy().to_string()
    }
}

/// Build the fragment tree under `key`, recording every node's composed html.
fn compose(key: &str, nodes: &[SnippetInstance], out: &mut BTreeMap<String, String>) -> Fragment {
    let html = nodes
        .iter()
        .find(|n| n.key == key)
        .map(|n| n.html.clone())
        .unwrap_or_default();
    let mut fragment = Fragment::new(key, html);
    for child in nodes.iter().filter(|n| n.parent.as_deref() == Some(key)) {
        fragment.insert(compose(&child.key, nodes, out));
    }
    out.insert(key.to_string(), fragment.render());
    fragment
}
