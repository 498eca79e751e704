//! Project configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::compiler::CompilerOptions;
use crate::discovery::{ModuleMap, PluginMap};
use crate::error::{read_source, Result};
use crate::linker::{AssetLinker, DEFAULT_LINKS_DIR};
use crate::parse::WidgetRegistry;
use crate::resolver::DuplicateClassPolicy;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    App,
    Script,
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTarget {
    pub entry_point: PathBuf,
    pub output: PathBuf,
    #[serde(rename = "type")]
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LxConfig {
    pub runtime_core: PathBuf,
    #[serde(default)]
    pub app_bootstrap: Option<PathBuf>,
    pub maps_dir: PathBuf,
    pub public_root: String,
    pub internal_root: PathBuf,
    #[serde(default = "default_links_dir")]
    pub links_dir: String,
    #[serde(default)]
    pub targets: Vec<BuildTarget>,
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,
    #[serde(default)]
    pub package_dirs: Vec<PathBuf>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub duplicate_class_policy: DuplicateClassPolicy,
    #[serde(default)]
    pub widgets: HashMap<String, String>,
    #[serde(default)]
    pub check_syntax: bool,
}

fn default_links_dir() -> String {
    DEFAULT_LINKS_DIR.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_mode() -> String {
    "dev".to_string()
}

impl LxConfig {
    /// Load a JSON or YAML config; relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_source(path)?;
        let mut config: LxConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.runtime_core);
        if let Some(p) = self.app_bootstrap.as_mut() {
            join(p);
        }
        join(&mut self.maps_dir);
        join(&mut self.internal_root);
        for target in &mut self.targets {
            join(&mut target.entry_point);
            join(&mut target.output);
        }
        self.source_roots.iter_mut().for_each(join);
        self.package_dirs.iter_mut().for_each(join);
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            duplicate_class_policy: self.duplicate_class_policy,
            check_syntax: self.check_syntax,
            ..Default::default()
        }
    }

    /// Built-in widgets, then module widget tags, then the configured aliases.
    pub fn widget_registry(&self, modules: &ModuleMap) -> WidgetRegistry {
        let mut widgets = WidgetRegistry::default();
        widgets.extend(&modules.widget_tags());
        widgets.extend(&self.widgets);
        widgets
    }

    pub fn sandbox(&self) -> Sandbox {
        let sandbox = Sandbox::new(&self.runtime_core);
        match &self.app_bootstrap {
            Some(p) => sandbox.with_bootstrap(p),
            None => sandbox,
        }
    }

    pub fn linker(&self) -> AssetLinker {
        AssetLinker::new(self.public_root.clone(), &self.internal_root).with_links_dir(&self.links_dir)
    }

    /// Source roots followed by package directories.
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        self.source_roots
            .iter()
            .chain(self.package_dirs.iter())
            .cloned()
            .collect()
    }

    pub fn load_modules(&self) -> Result<ModuleMap> {
        ModuleMap::load(&self.maps_dir)
    }

    pub fn load_plugins(&self) -> Result<PluginMap> {
        PluginMap::load(&self.maps_dir)
    }

    /// Rescan the roots and persist both lookup maps.
    pub fn regenerate_maps(&self) -> Result<(ModuleMap, PluginMap)> {
        let roots = self.scan_roots();
        let mut modules = ModuleMap::new(&self.maps_dir);
        modules.regenerate(&roots);
        modules.save(&self.maps_dir)?;
        let mut plugins = PluginMap::new(&self.maps_dir);
        plugins.regenerate(&roots);
        plugins.save(&self.maps_dir)?;
        tracing::info!(
            "[lx:config] Regenerated maps: {} modules, {} plugins",
            modules.len(),
            plugins.len()
        );
        Ok((modules, plugins))
    }
}
