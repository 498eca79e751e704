//! Compile unit: the per-invocation state threaded through the directive
//! compiler and the dependency resolver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::asset::AssetSet;
use crate::error::{read_source, Result};
use crate::i18n::I18nTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Context {
    Client,
    Server,
}

impl Context {
    pub fn label(&self) -> &'static str {
        match self {
            Context::Client => "CLIENT",
            Context::Server => "SERVER",
        }
    }
}

/// Flags of a `@lx:require` directive, also settable on a whole unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileFlags {
    pub recursive: bool,
    pub force: bool,
    pub unwrapped: bool,
}

impl CompileFlags {
    /// Parse a flag cluster such as `-RF`.
    pub fn parse(cluster: &str) -> Self {
        let mut flags = CompileFlags::default();
        for c in cluster.trim_start_matches('-').chars() {
            match c.to_ascii_uppercase() {
                'R' => flags.recursive = true,
                'F' => flags.force = true,
                'U' => flags.unwrapped = true,
                _ => {}
            }
        }
        flags
    }

    pub fn union(self, other: CompileFlags) -> Self {
        CompileFlags {
            recursive: self.recursive || other.recursive,
            force: self.force || other.force,
            unwrapped: self.unwrapped || other.unwrapped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Structural,
    Resolution,
    Data,
    Execution,
    Syntax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub file: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{:?}: {} ({})", self.kind, self.message, file),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub file_path: Option<PathBuf>,
    /// Overrides the file directory for relative paths.
    pub base_dir: Option<PathBuf>,
    pub prev_code: String,
    pub code: Option<String>,
    pub post_code: String,
    pub context: Context,
    pub is_app: bool,
    pub language: String,
    pub mode: String,
    pub flags: CompileFlags,
    /// Modules requested up front; injected as `@lx:use` headers.
    pub use_modules: Vec<String>,
    pub ignored_modules: Vec<String>,
    pub assets: AssetSet,
    pub compiled_modules: Vec<String>,
    pub compiled_files: Vec<PathBuf>,
    /// Module names recorded while module building is disabled.
    pub deferred_modules: Vec<String>,
    pub module_i18n: I18nTable,
    pub plugin_i18n: Option<I18nTable>,
    pub build_modules: bool,
    pub wrap: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileUnit {
    fn blank(context: Context) -> Self {
        CompileUnit {
            file_path: None,
            base_dir: None,
            prev_code: String::new(),
            code: None,
            post_code: String::new(),
            context,
            is_app: false,
            language: "en".to_string(),
            mode: "dev".to_string(),
            flags: CompileFlags::default(),
            use_modules: Vec::new(),
            ignored_modules: Vec::new(),
            assets: AssetSet::new(),
            compiled_modules: Vec::new(),
            compiled_files: Vec::new(),
            deferred_modules: Vec::new(),
            module_i18n: I18nTable::default(),
            plugin_i18n: None,
            build_modules: true,
            wrap: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, context: Context) -> Self {
        let mut unit = Self::blank(context);
        unit.file_path = Some(path.into());
        unit
    }

    pub fn from_code(code: impl Into<String>, context: Context) -> Self {
        let mut unit = Self::blank(context);
        unit.code = Some(code.into());
        unit
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// The compilation source: inline code wins when both are somehow set.
    pub fn source(&self) -> Result<String> {
        match (&self.code, &self.file_path) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) => read_source(path),
            (None, None) => Ok(String::new()),
        }
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> PathBuf {
        if let Some(dir) = &self.base_dir {
            return dir.clone();
        }
        self.file_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn file_label(&self) -> String {
        self.file_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "<inline>".to_string())
    }

    pub fn is_file_compiled(&self, path: &Path) -> bool {
        self.compiled_files.iter().any(|p| p == path)
    }

    pub fn mark_file_compiled(&mut self, path: &Path) {
        if !self.is_file_compiled(path) {
            self.compiled_files.push(path.to_path_buf());
        }
    }

    /// Log and record an isolated failure.
    pub fn report(&mut self, kind: DiagnosticKind, file: Option<&Path>, message: impl Into<String>) {
        let message = message.into();
        let file = file.map(|p| p.to_string_lossy().to_string());
        match kind {
            DiagnosticKind::Structural | DiagnosticKind::Resolution => {
                tracing::error!(file = ?file, "[lx:compiler] {}", message)
            }
            _ => tracing::warn!(file = ?file, "[lx:compiler] {}", message),
        }
        self.diagnostics.push(Diagnostic {
            kind,
            message,
            file,
        });
    }

    pub fn has_diagnostic(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}

/// Lexically resolve `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical form used to compare files: the real path when the file exists,
/// the lexically normalised absolute path otherwise.
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_path(&absolute)
}
