use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Js,
    Css,
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub path: String,
    pub kind: AssetKind,
}

/// Render-tree wide asset collection.
///
/// Paths are unique: the first classification of a path wins and insertion
/// order is kept.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    items: Vec<Asset>,
    seen: HashSet<String>,
}

impl AssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the path was already registered.
    pub fn add(&mut self, path: impl Into<String>, kind: AssetKind) -> bool {
        let path = path.into();
        if self.seen.contains(&path) {
            return false;
        }
        self.seen.insert(path.clone());
        self.items.push(Asset { path, kind });
        true
    }

    pub fn add_js(&mut self, path: impl Into<String>) -> bool {
        self.add(path, AssetKind::Js)
    }

    pub fn add_css(&mut self, path: impl Into<String>) -> bool {
        self.add(path, AssetKind::Css)
    }

    pub fn add_module(&mut self, name: impl Into<String>) -> bool {
        self.add(name, AssetKind::Module)
    }

    pub fn merge(&mut self, other: &AssetSet) {
        for asset in &other.items {
            self.add(asset.path.clone(), asset.kind);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: AssetKind) -> Vec<String> {
        self.items
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
