//! Plugin cache strategies and content hashing.
//!
//! Only `none` (always rebuild) is implemented; the other strategies a plugin
//! config may name are rejected at load time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LxError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    None,
    Build,
    Strict,
    On,
    Smart,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::None => "none",
            CacheType::Build => "build",
            CacheType::Strict => "strict",
            CacheType::On => "on",
            CacheType::Smart => "smart",
        }
    }

    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            CacheType::None => Ok(()),
            other => Err(LxError::UnsupportedCacheMode(other.as_str().to_string())),
        }
    }
}

/// Lowercase hex SHA-256 of `source`.
pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_none_is_supported() {
        assert!(CacheType::None.ensure_supported().is_ok());
        for t in [CacheType::Build, CacheType::Strict, CacheType::On, CacheType::Smart] {
            match t.ensure_supported() {
                Err(LxError::UnsupportedCacheMode(name)) => assert_eq!(name, t.as_str()),
                other => panic!("expected unsupported mode, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cache_type_from_config_text() {
        let t: CacheType = serde_yaml::from_str("smart").unwrap();
        assert_eq!(t, CacheType::Smart);
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_eq!(compute_hash("abc").len(), 64);
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
    }
}
