//! Error taxonomy for the lx compiler.
//!
//! Errors attributable to a single file, module or snippet are isolated by
//! the callers (logged and recorded as [`Diagnostic`](crate::unit::Diagnostic)s);
//! only the variants surfaced through [`Result`] abort a whole request.

use std::path::PathBuf;

use crate::validate::CompilerError;

#[derive(Debug, thiserror::Error)]
pub enum LxError {
    /// Template DSL or class structure violation.
    #[error(transparent)]
    Structural(#[from] CompilerError),

    /// Missing module, file or snippet; ambiguous snippet path.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Unreadable or malformed referenced data.
    #[error("data error in {path}: {reason}")]
    Data { path: String, reason: String },

    /// Interpreter construction or result transport failure.
    #[error("sandbox infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("plugin cache type '{0}' is not supported (only 'none' is implemented)")]
    UnsupportedCacheMode(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LxError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LxError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn data(path: impl Into<String>, reason: impl ToString) -> Self {
        LxError::Data {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LxError>;

/// Read a file to string, mapping the failure to [`LxError::Io`].
pub fn read_source(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| LxError::io(path, e))
}
