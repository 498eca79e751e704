//! Asset linker: maps internal file paths to public URLs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::compute_hash;
use crate::compiler::is_remote;
use crate::error::{LxError, Result};
use crate::unit::canonical_path;

pub const DEFAULT_LINKS_DIR: &str = "auto";

#[derive(Debug, Clone)]
pub struct AssetLinker {
    /// URL prefix the internal root is served under, e.g. `/web`.
    public_root: String,
    /// Public-facing directory on disk.
    internal_root: PathBuf,
    links_dir: String,
}

impl AssetLinker {
    pub fn new(public_root: impl Into<String>, internal_root: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into().trim_end_matches('/').to_string(),
            internal_root: internal_root.into(),
            links_dir: DEFAULT_LINKS_DIR.to_string(),
        }
    }

    pub fn with_links_dir(mut self, dir: impl Into<String>) -> Self {
        self.links_dir = dir.into().trim_matches('/').to_string();
        self
    }

    pub fn link(&self, path: &str) -> Result<String> {
        if is_remote(path) {
            return Ok(path.to_string());
        }

        let source = canonical_path(Path::new(path));
        let root = canonical_path(&self.internal_root);
        if let Ok(rel) = source.strip_prefix(&root) {
            return Ok(self.public_url(&rel.to_string_lossy()));
        }

        let mut name = compute_hash(&source.to_string_lossy())[..32].to_string();
        if let Some(ext) = source.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        let dir = root.join(&self.links_dir);
        let target = dir.join(&name);
        if fs::symlink_metadata(&target).is_err() {
            fs::create_dir_all(&dir).map_err(|e| LxError::io(&dir, e))?;
            create_link(&source, &target)?;
            tracing::debug!("[lx:linker] Linked {:?} -> {:?}", source, target);
        }
        Ok(self.public_url(&format!("{}/{}", self.links_dir, name)))
    }

    pub fn link_all(&self, paths: &[String]) -> Result<Vec<String>> {
        paths.iter().map(|p| self.link(p)).collect()
    }

    pub fn link_map(&self, paths: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        paths
            .iter()
            .map(|(k, p)| Ok((k.clone(), self.link(p)?)))
            .collect()
    }

    fn public_url(&self, rel: &str) -> String {
        format!("{}/{}", self.public_root, rel.trim_start_matches('/'))
    }
}

#[cfg(unix)]
fn create_link(source: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(source, target).map_err(|e| LxError::io(target, e))
}

#[cfg(not(unix))]
fn create_link(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| LxError::io(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, AssetLinker) {
        let dir = tempfile::tempdir().unwrap();
        let web = dir.path().join("web");
        fs::create_dir_all(&web).unwrap();
        let linker = AssetLinker::new("/web", &web);
        (dir, linker)
    }

    #[test]
    fn test_remote_unchanged() {
        let (_dir, linker) = setup();
        assert_eq!(linker.link("https://cdn.x/a.js").unwrap(), "https://cdn.x/a.js");
        assert_eq!(linker.link("//cdn.x/a.js").unwrap(), "//cdn.x/a.js");
    }

    #[test]
    fn test_under_internal_root_is_prefix_rewritten() {
        let (dir, linker) = setup();
        let file = dir.path().join("web/css/main.css");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "a{}").unwrap();
        assert_eq!(linker.link(&file.to_string_lossy()).unwrap(), "/web/css/main.css");
    }

    #[test]
    fn test_linking_is_idempotent() {
        let (dir, linker) = setup();
        let file = dir.path().join("src/app.js");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "1").unwrap();
        let path = file.to_string_lossy().to_string();

        let first = linker.link(&path).unwrap();
        let second = linker.link(&path).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("/web/auto/") && first.ends_with(".js"));

        let links: Vec<_> = fs::read_dir(dir.path().join("web/auto")).unwrap().collect();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_link_map_keeps_keys() {
        let (_dir, linker) = setup();
        let mut map = BTreeMap::new();
        map.insert("logo".to_string(), "http://x/logo.png".to_string());
        let out = linker.link_map(&map).unwrap();
        assert_eq!(out["logo"], "http://x/logo.png");
    }
}
