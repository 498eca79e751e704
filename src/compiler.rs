//! Directive compiler: rewrites `@lx:` directive source into plain script.
//!
//! Stages run strictly in order over the accumulated text:
//! 1. requested `use` modules are injected as header directives;
//! 2. the inner pass (shared with the dependency resolver);
//! 3. optional isolating closure, then `require` and `use` expansion;
//! 4. i18n substitution.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::path::Path;

use crate::class_sugar;
use crate::codegen::TemplateCompiler;
use crate::discovery::ModuleMap;
use crate::error::{read_source, LxError, Result};
use crate::i18n;
use crate::parse::{TemplateParser, WidgetRegistry};
use crate::resolver::{DependencyResolver, DuplicateClassPolicy};
use crate::scan::{strip_comments, unquote};
use crate::unit::{canonical_path, normalize_path, CompileUnit, DiagnosticKind};
use crate::validate::check_script_syntax;

lazy_static! {
    static ref ESCAPED_DIRECTIVE_RE: Regex = Regex::new(r"//[ \t]*@lx:[^\n]*").unwrap();
    static ref ML_BLOCK_RE: Regex =
        Regex::new(r"(?s)@lx:<ml(?::([A-Za-z_$][\w$]*))?:(.*?)@lx:ml>").unwrap();
    static ref MODULE_DIRECTIVE_RE: Regex =
        Regex::new(r"@lx:module(?:\s+[\w.\-]+|-data\s*:[^;]*)\s*;").unwrap();
    static ref CONTEXT_BLOCK_RE: Regex =
        Regex::new(r"(?s)@lx:<context\s+(\w+)\s*:(.*?)@lx:context>").unwrap();
    static ref MODE_BLOCK_RE: Regex =
        Regex::new(r"(?s)@lx:<mode\s+(\w+)\s*:(.*?)@lx:mode>").unwrap();
    static ref DATA_INJECT_RE: Regex =
        Regex::new(r#"lx\(\s*(json|yaml)\s*,\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    static ref ASSET_RE: Regex = Regex::new(r"@lx:(js|css)\s+([^;\n]+);").unwrap();
    static ref SELF_RE: Regex = Regex::new(r"lx\.self\(\s*([\w.$]+)\s*\)").unwrap();
}

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub default_extension: String,
    pub duplicate_class_policy: DuplicateClassPolicy,
    pub check_syntax: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            default_extension: "js".to_string(),
            duplicate_class_policy: DuplicateClassPolicy::FirstWins,
            check_syntax: false,
        }
    }
}

pub struct DirectiveCompiler<'a> {
    modules: &'a ModuleMap,
    widgets: WidgetRegistry,
    options: CompilerOptions,
}

impl<'a> DirectiveCompiler<'a> {
    pub fn new(modules: &'a ModuleMap) -> Self {
        let mut widgets = WidgetRegistry::default();
        widgets.extend(&modules.widget_tags());
        Self {
            modules,
            widgets,
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.widgets = widgets;
        self
    }

    pub fn modules(&self) -> &ModuleMap {
        self.modules
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn widgets(&self) -> &WidgetRegistry {
        &self.widgets
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FULL PIPELINE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn compile(&self, unit: &mut CompileUnit) -> Result<String> {
        let source = unit.source()?;
        let file = unit.file_path.as_deref().map(canonical_path);
        if let Some(f) = &file {
            unit.mark_file_compiled(f);
        }
        tracing::debug!("[lx:compiler] Compiling {}", unit.file_label());

        // Stage 1
        let requested = std::mem::take(&mut unit.use_modules);
        let mut code = String::new();
        for name in &requested {
            code.push_str(&format!("@lx:use {};\n", name));
        }
        for part in [&unit.prev_code, &source, &unit.post_code] {
            if !part.is_empty() {
                code.push_str(part);
                code.push('\n');
            }
        }

        // Stage 2
        let mut code = self.inner_pass(&code, file.as_deref(), unit)?;

        // Stage 3
        if unit.wrap {
            code = wrap_isolated(&code);
        }
        let base_dir = unit.base_dir();
        let code = DependencyResolver::new(self).expand(&code, &base_dir, unit)?;

        // Stage 4
        let code = self.finish(&code, unit);

        if self.options.check_syntax {
            for err in check_script_syntax(&code) {
                unit.report(DiagnosticKind::Syntax, file.as_deref(), err);
            }
        }
        Ok(code)
    }

    /// Stage 2, run once per file. Also used by the resolver for class discovery.
    pub fn inner_pass(&self, code: &str, file: Option<&Path>, unit: &mut CompileUnit) -> Result<String> {
        let label = file
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| unit.file_label());
        let base_dir = file
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| unit.base_dir());

        let code = ESCAPED_DIRECTIVE_RE.replace_all(code, "").to_string();
        let code = self.expand_templates(&code, &label, file, unit);
        let code = strip_comments(&code);
        let code = MODULE_DIRECTIVE_RE.replace_all(&code, "").to_string();
        let code = filter_blocks(&CONTEXT_BLOCK_RE, &code, unit.context.label());
        let code = self.inject_data(&code, &base_dir, file, unit);

        let sugar = class_sugar::rewrite(&code, &label).map_err(LxError::Structural)?;
        for header in &sugar.malformed {
            let err = class_sugar::malformed_error(&label, header);
            unit.report(DiagnosticKind::Structural, file, err.to_string());
        }

        let code = self.extract_assets(&sugar.code, &base_dir, unit);
        let code = filter_blocks(&MODE_BLOCK_RE, &code, &unit.mode);
        Ok(code)
    }

    /// Stage 4.
    pub fn finish(&self, code: &str, unit: &CompileUnit) -> String {
        let code = i18n::substitute(
            code,
            &unit.language,
            &unit.module_i18n,
            unit.plugin_i18n.as_ref(),
        );
        SELF_RE.replace_all(&code, "Plugin.$1").to_string()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INNER PASS STEPS
    // ═══════════════════════════════════════════════════════════════════════════

    fn expand_templates(&self, code: &str, label: &str, file: Option<&Path>, unit: &mut CompileUnit) -> String {
        let mut failures = Vec::new();
        let out = ML_BLOCK_RE
            .replace_all(code, |caps: &Captures| {
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let line_offset = code[..start].matches('\n').count() as u32;
                let out_var = caps.get(1).map(|m| m.as_str());
                let body = &caps[2];
                let compiled = TemplateParser::new(&self.widgets, label)
                    .with_line_offset(line_offset)
                    .parse(body)
                    .and_then(|nodes| TemplateCompiler::new(label, out_var).compile(&nodes));
                match compiled {
                    Ok(script) => script,
                    Err(e) => {
                        failures.push(e.to_string());
                        String::new()
                    }
                }
            })
            .to_string();
        for failure in failures {
            unit.report(DiagnosticKind::Structural, file, failure);
        }
        out
    }

    fn inject_data(&self, code: &str, base_dir: &Path, file: Option<&Path>, unit: &mut CompileUnit) -> String {
        let mut failures = Vec::new();
        let out = DATA_INJECT_RE
            .replace_all(code, |caps: &Captures| {
                let path = normalize_path(&base_dir.join(&caps[2]));
                match load_data(&caps[1], &path) {
                    Ok(value) => value,
                    Err(e) => {
                        failures.push(e.to_string());
                        "null".to_string()
                    }
                }
            })
            .to_string();
        for failure in failures {
            unit.report(DiagnosticKind::Data, file, failure);
        }
        out
    }

    fn extract_assets(&self, code: &str, base_dir: &Path, unit: &mut CompileUnit) -> String {
        let mut found = Vec::new();
        let out = ASSET_RE
            .replace_all(code, |caps: &Captures| {
                found.push((caps[1].to_string(), resolve_asset_path(unquote(&caps[2]), base_dir)));
                String::new()
            })
            .to_string();
        for (kind, path) in found {
            if kind == "css" {
                unit.assets.add_css(path);
            } else {
                unit.assets.add_js(path);
            }
        }
        out
    }
}

fn load_data(kind: &str, path: &Path) -> Result<String> {
    let raw = read_source(path)?;
    let value: serde_json::Value = if kind == "yaml" {
        serde_yaml::from_str(&raw)?
    } else {
        serde_json::from_str(&raw)?
    };
    Ok(serde_json::to_string(&value)?)
}

/// Keep the body of every block whose label matches, drop the others.
fn filter_blocks(re: &Regex, code: &str, active: &str) -> String {
    re.replace_all(code, |caps: &Captures| {
        if caps[1].eq_ignore_ascii_case(active) {
            caps[2].to_string()
        } else {
            String::new()
        }
    })
    .to_string()
}

pub(crate) fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//")
}

fn resolve_asset_path(path: &str, base_dir: &Path) -> String {
    if is_remote(path) || !(path.starts_with("./") || path.starts_with("../")) {
        return path.to_string();
    }
    normalize_path(&base_dir.join(path))
        .to_string_lossy()
        .to_string()
}

pub fn wrap_isolated(code: &str) -> String {
    format!("(function(){{\n{}\n}})();", code)
}
