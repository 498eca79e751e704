//! Discovery Module for the lx compiler
//!
//! Module and plugin lookup services. Both maps are explicit values passed
//! through the compile/render call chain; they load from and save to the
//! maps directory (`_modules.json`, `_plugins.json`) and can be regenerated
//! by scanning source roots.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{read_source, LxError, Result};
use crate::plugin::{PluginDescriptor, CONFIG_FILE_NAMES};

pub const MODULES_MAP_FILE: &str = "_modules.json";
pub const PLUGINS_MAP_FILE: &str = "_plugins.json";

lazy_static! {
    static ref MODULE_DECL_RE: Regex = Regex::new(r"@lx:module\s+([\w.\-]+)\s*;").unwrap();
    static ref MODULE_DATA_RE: Regex =
        Regex::new(r"@lx:module-data\s*:\s*([\w.\-]+)\s*=\s*([^;]+);").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE MAP
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ModuleDescriptor {
    pub fn widget_tag(&self) -> Option<&str> {
        self.metadata.get("widget").and_then(|v| v.as_str())
    }

    pub fn i18n_file(&self) -> Option<&str> {
        self.metadata.get("i18n").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    /// Relative module paths resolve against this directory.
    root: PathBuf,
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleMap {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: BTreeMap::new(),
        }
    }

    /// Load `_modules.json` from `maps_dir`. A missing file yields an empty map.
    pub fn load(maps_dir: &Path) -> Result<Self> {
        let mut map = Self::new(maps_dir);
        let file = maps_dir.join(MODULES_MAP_FILE);
        if !file.exists() {
            return Ok(map);
        }
        let list: Vec<ModuleDescriptor> = serde_json::from_str(&read_source(&file)?)?;
        for desc in list {
            map.insert(desc);
        }
        Ok(map)
    }

    pub fn save(&self, maps_dir: &Path) -> Result<()> {
        fs::create_dir_all(maps_dir).map_err(|e| LxError::io(maps_dir, e))?;
        let list: Vec<&ModuleDescriptor> = self.modules.values().collect();
        let file = maps_dir.join(MODULES_MAP_FILE);
        fs::write(&file, serde_json::to_string_pretty(&list)?).map_err(|e| LxError::io(&file, e))
    }

    pub fn reset(&mut self) {
        self.modules.clear();
    }

    /// Returns false (and keeps the existing entry) on a duplicate name.
    pub fn insert(&mut self, desc: ModuleDescriptor) -> bool {
        if self.modules.contains_key(&desc.name) {
            return false;
        }
        self.modules.insert(desc.name.clone(), desc);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn resolve_path(&self, desc: &ModuleDescriptor) -> PathBuf {
        let path = Path::new(&desc.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Widget tag aliases declared by modules, mapped to the module name.
    pub fn widget_tags(&self) -> HashMap<String, String> {
        self.modules
            .values()
            .filter_map(|d| d.widget_tag().map(|t| (t.to_string(), d.name.clone())))
            .collect()
    }

    /// Rebuild the map by scanning `roots` for `@lx:module` declarations.
    /// Returns the duplicate names that were skipped.
    pub fn regenerate(&mut self, roots: &[PathBuf]) -> Vec<String> {
        self.reset();
        let mut duplicates = Vec::new();
        for file in find_script_files(roots) {
            let source = match fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("[lx:discovery] Failed to read {:?}: {}", file, e);
                    continue;
                }
            };
            let Some(desc) = parse_module_declaration(&source, &file) else {
                continue;
            };
            let name = desc.name.clone();
            if !self.insert(desc) {
                tracing::warn!("[lx:discovery] Duplicate module {} in {:?}", name, file);
                duplicates.push(name);
            }
        }
        duplicates
    }
}

/// Read the module declaration and metadata pairs out of a source file.
pub fn parse_module_declaration(source: &str, file: &Path) -> Option<ModuleDescriptor> {
    let name = MODULE_DECL_RE.captures(source)?[1].to_string();
    let metadata = MODULE_DATA_RE
        .captures_iter(source)
        .map(|c| (c[1].to_string(), metadata_value(&c[2])))
        .collect();
    Some(ModuleDescriptor {
        name,
        path: file.to_string_lossy().to_string(),
        metadata,
    })
}

fn metadata_value(raw: &str) -> serde_json::Value {
    let raw = raw.trim();
    serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(crate::scan::unquote(raw).to_string()))
}

/// Recursively find all .js files below the given roots.
fn find_script_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.is_file() && path.extension().map(|e| e == "js").unwrap_or(false) {
                files.push(path.to_path_buf());
            }
        }
    }
    files
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLUGIN MAP
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
struct PluginMarker {
    name: Option<String>,
    #[serde(default)]
    server: Option<PluginMarkerServer>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginMarkerServer {
    key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PluginMap {
    root: PathBuf,
    plugins: BTreeMap<String, PluginDescriptor>,
}

impl PluginMap {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            plugins: BTreeMap::new(),
        }
    }

    pub fn load(maps_dir: &Path) -> Result<Self> {
        let mut map = Self::new(maps_dir);
        let file = maps_dir.join(PLUGINS_MAP_FILE);
        if !file.exists() {
            return Ok(map);
        }
        let list: Vec<PluginDescriptor> = serde_json::from_str(&read_source(&file)?)?;
        for desc in list {
            map.insert(desc);
        }
        Ok(map)
    }

    pub fn save(&self, maps_dir: &Path) -> Result<()> {
        fs::create_dir_all(maps_dir).map_err(|e| LxError::io(maps_dir, e))?;
        let list: Vec<&PluginDescriptor> = self.plugins.values().collect();
        let file = maps_dir.join(PLUGINS_MAP_FILE);
        fs::write(&file, serde_json::to_string_pretty(&list)?).map_err(|e| LxError::io(&file, e))
    }

    pub fn reset(&mut self) {
        self.plugins.clear();
    }

    pub fn insert(&mut self, desc: PluginDescriptor) -> bool {
        if self.plugins.contains_key(&desc.name) {
            return false;
        }
        self.plugins.insert(desc.name.clone(), desc);
        true
    }

    /// Descriptor with its path made absolute against the map root.
    pub fn get(&self, name: &str) -> Option<PluginDescriptor> {
        let mut desc = self.plugins.get(name)?.clone();
        if Path::new(&desc.path).is_relative() {
            desc.path = self.root.join(&desc.path).to_string_lossy().to_string();
        }
        Some(desc)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Rebuild the map by scanning `roots` for plugin config files.
    pub fn regenerate(&mut self, roots: &[PathBuf]) -> Vec<String> {
        self.reset();
        let mut duplicates = Vec::new();
        for root in roots {
            for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
                let Ok(entry) = entry else { continue };
                let file_name = entry.file_name().to_string_lossy();
                if !entry.path().is_file() || !CONFIG_FILE_NAMES.contains(&&*file_name) {
                    continue;
                }
                let Some(dir) = entry.path().parent() else { continue };
                let marker: PluginMarker = match fs::read_to_string(entry.path())
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_yaml::from_str(&raw).map_err(|e| e.to_string()))
                {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("[lx:discovery] Bad plugin config {:?}: {}", entry.path(), e);
                        continue;
                    }
                };
                let name = marker.name.unwrap_or_else(|| {
                    dir.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default()
                });
                let desc = PluginDescriptor {
                    name: name.clone(),
                    path: dir.to_string_lossy().to_string(),
                    plugin_key: marker.server.and_then(|s| s.key),
                };
                if !self.insert(desc) {
                    tracing::warn!("[lx:discovery] Duplicate plugin {} in {:?}", name, dir);
                    duplicates.push(name);
                }
            }
        }
        duplicates
    }
}
