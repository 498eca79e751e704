//! Dependency resolver: expands `@lx:require` (file mode) and `@lx:use`
//! (module mode) directives into ordered source text.

use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::class_sugar::discover_classes;
use crate::compiler::{wrap_isolated, DirectiveCompiler};
use crate::error::{LxError, Result};
use crate::i18n::{self, I18nTable};
use crate::scan::{replace_all_with, split_top_level, unquote};
use crate::unit::{canonical_path, CompileFlags, CompileUnit, DiagnosticKind};

lazy_static! {
    static ref REQUIRE_RE: Regex =
        Regex::new(r"@lx:require\s+(?:(-[A-Za-z]+)\s+)?([^;]+);").unwrap();
    static ref USE_RE: Regex =
        Regex::new(r"@lx:use\s+([\w.\-]+(?:\s*,\s*[\w.\-]+)*)\s*;").unwrap();
}

/// Which definition survives when two files of one require group declare
/// the same class name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateClassPolicy {
    #[default]
    FirstWins,
    LastWins,
}

/// One file considered for inclusion by a `@lx:require` directive.
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    pub path: PathBuf,
    pub rewritten_code: String,
    pub declared_classes: Vec<String>,
    pub parent_classes: Vec<String>,
    /// Indices of entries extending a class declared here.
    pub dependents: Vec<usize>,
    pub reference_count: usize,
    /// Discovery position, the tie breaker.
    pub order: usize,
}

impl DependencyEntry {
    pub fn new(path: PathBuf, rewritten_code: String, order: usize) -> Self {
        let classes = discover_classes(&rewritten_code);
        let declared_classes = classes.iter().map(|c| c.name.clone()).collect();
        let parent_classes = classes
            .iter()
            .filter_map(|c| c.parent_short_name().map(str::to_string))
            .collect();
        Self {
            path,
            rewritten_code,
            declared_classes,
            parent_classes,
            dependents: Vec::new(),
            reference_count: 0,
            order,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Link dependents, compute reference counts and return the emission order.
///
/// `reference_count(f) = 1 + Σ reference_count(d)` over the files `d` that
/// extend a class declared in `f`; files depended upon by more others are
/// emitted first, ties by discovery order. Cycles contribute once.
pub fn order_entries(entries: &mut [DependencyEntry]) -> Vec<usize> {
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        for class in &entry.declared_classes {
            owner.entry(class.as_str()).or_insert(i);
        }
    }
    let mut links = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        for parent in &entry.parent_classes {
            if let Some(&j) = owner.get(parent.as_str()) {
                if j != i {
                    links.push((j, i));
                }
            }
        }
    }
    for (provider, dependent) in links {
        if !entries[provider].dependents.contains(&dependent) {
            entries[provider].dependents.push(dependent);
        }
    }

    let mut memo: Vec<Option<usize>> = vec![None; entries.len()];
    for i in 0..entries.len() {
        let mut visiting = HashSet::new();
        let count = reference_count(entries, i, &mut memo, &mut visiting);
        entries[i].reference_count = count;
    }

    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        entries[b]
            .reference_count
            .cmp(&entries[a].reference_count)
            .then(entries[a].order.cmp(&entries[b].order))
    });
    order
}

fn reference_count(
    entries: &[DependencyEntry],
    i: usize,
    memo: &mut Vec<Option<usize>>,
    visiting: &mut HashSet<usize>,
) -> usize {
    if let Some(count) = memo[i] {
        return count;
    }
    if !visiting.insert(i) {
        return 0;
    }
    let mut count = 1;
    for &d in &entries[i].dependents {
        count += reference_count(entries, d, memo, visiting);
    }
    visiting.remove(&i);
    memo[i] = Some(count);
    count
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct DependencyResolver<'c, 'a> {
    compiler: &'c DirectiveCompiler<'a>,
}

impl<'c, 'a> DependencyResolver<'c, 'a> {
    pub fn new(compiler: &'c DirectiveCompiler<'a>) -> Self {
        Self { compiler }
    }

    /// Expand requires relative to `base_dir`, then module uses.
    pub fn expand(&self, code: &str, base_dir: &Path, unit: &mut CompileUnit) -> Result<String> {
        let code = self.expand_requires(code, base_dir, unit)?;
        self.expand_uses(&code, unit)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File mode
    // ─────────────────────────────────────────────────────────────────────────

    pub fn expand_requires(&self, code: &str, base_dir: &Path, unit: &mut CompileUnit) -> Result<String> {
        replace_all_with(&REQUIRE_RE, code, |caps| {
            let flags = caps
                .get(1)
                .map(|m| CompileFlags::parse(m.as_str()))
                .unwrap_or_default()
                .union(unit.flags);
            let directive = caps[0].to_string();
            match self.require(caps[2].trim(), flags, base_dir, unit)? {
                Some(expanded) => Ok(expanded),
                None => Ok(directive),
            }
        })
    }

    /// `None` leaves the directive untouched.
    fn require(
        &self,
        spec: &str,
        flags: CompileFlags,
        base_dir: &Path,
        unit: &mut CompileUnit,
    ) -> Result<Option<String>> {
        let Some(paths) = self.resolve_spec(spec, flags, base_dir) else {
            tracing::warn!("[lx:resolver] Cannot resolve require '{}' from {:?}", spec, base_dir);
            return Ok(None);
        };
        let single = paths.len() == 1 && !spec.starts_with('{');

        let pending: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| canonical_path(&p))
            .filter(|p| flags.force || !unit.is_file_compiled(p))
            .collect();
        for path in &pending {
            unit.mark_file_compiled(path);
        }

        let sources: Vec<(PathBuf, std::io::Result<String>)> = pending
            .par_iter()
            .map(|p| (p.clone(), fs::read_to_string(p)))
            .collect();

        let mut entries = Vec::new();
        for (path, source) in sources {
            let source = match source {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("[lx:resolver] Cannot read {:?}: {}", path, e);
                    if single {
                        return Ok(None);
                    }
                    continue;
                }
            };
            match self.compiler.inner_pass(&source, Some(&path), unit) {
                Ok(code) => {
                    let order = entries.len();
                    entries.push(DependencyEntry::new(path, code, order));
                }
                Err(LxError::Structural(e)) => {
                    unit.report(DiagnosticKind::Structural, Some(&path), e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        let entries = self.drop_duplicate_classes(entries, unit);
        let mut entries = entries;
        let order = order_entries(&mut entries);

        let mut parts = Vec::with_capacity(order.len());
        for i in order {
            let entry = &entries[i];
            let dir = entry.path.parent().map(Path::to_path_buf).unwrap_or_default();
            parts.push(self.expand_requires(&entry.rewritten_code, &dir, unit)?);
        }
        let joined = parts.join("\n");
        if joined.trim().is_empty() {
            return Ok(Some(String::new()));
        }
        Ok(Some(if flags.unwrapped {
            joined
        } else {
            wrap_isolated(&joined)
        }))
    }

    fn resolve_spec(&self, spec: &str, flags: CompileFlags, base_dir: &Path) -> Option<Vec<PathBuf>> {
        if spec.starts_with('{') && spec.ends_with('}') {
            let inner = &spec[1..spec.len() - 1];
            let list: Vec<PathBuf> = split_top_level(inner, b',')
                .iter()
                .map(|item| self.with_extension(&base_dir.join(unquote(item))))
                .collect();
            return Some(list);
        }

        let raw = unquote(spec);
        let target = base_dir.join(raw);
        if raw.ends_with('/') || target.is_dir() {
            if !target.is_dir() {
                return None;
            }
            return Some(self.list_directory(&target, flags.recursive));
        }

        let file = self.with_extension(&target);
        file.is_file().then(|| vec![file])
    }

    fn with_extension(&self, path: &Path) -> PathBuf {
        if path.extension().is_some() {
            path.to_path_buf()
        } else {
            path.with_extension(&self.compiler.options().default_extension)
        }
    }

    fn list_directory(&self, dir: &Path, recursive: bool) -> Vec<PathBuf> {
        let ext = self.compiler.options().default_extension.as_str();
        let walker = WalkDir::new(dir).sort_by_file_name();
        let walker = if recursive { walker } else { walker.max_depth(1) };
        walker
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(ext))
            .map(|e| e.into_path())
            .collect()
    }

    fn drop_duplicate_classes(
        &self,
        entries: Vec<DependencyEntry>,
        unit: &mut CompileUnit,
    ) -> Vec<DependencyEntry> {
        let policy = self.compiler.options().duplicate_class_policy;
        let mut owner: HashMap<String, usize> = HashMap::new();
        let mut dropped: HashSet<usize> = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            for class in &entry.declared_classes {
                let Some(&first) = owner.get(class) else {
                    owner.insert(class.clone(), i);
                    continue;
                };
                if first == i {
                    continue;
                }
                let loser = match policy {
                    DuplicateClassPolicy::FirstWins => i,
                    DuplicateClassPolicy::LastWins => {
                        owner.insert(class.clone(), i);
                        first
                    }
                };
                unit.report(
                    DiagnosticKind::Resolution,
                    Some(&entries[loser].path),
                    format!(
                        "duplicate class {} in {:?} and {:?}",
                        class, entries[first].path, entry.path
                    ),
                );
                dropped.insert(loser);
            }
        }
        entries
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(order, mut e)| {
                e.order = order;
                e
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Module mode
    // ─────────────────────────────────────────────────────────────────────────

    pub fn expand_uses(&self, code: &str, unit: &mut CompileUnit) -> Result<String> {
        let mut stack = Vec::new();
        replace_all_with(&USE_RE, code, |caps| {
            let mut out = String::new();
            for name in caps[1].split(',').map(str::trim) {
                out.push_str(&self.use_module(name, unit, &mut stack)?);
            }
            Ok(out)
        })
    }

    /// Depth-first, post-order: a module's dependencies precede its body.
    fn use_module(&self, name: &str, unit: &mut CompileUnit, stack: &mut Vec<String>) -> Result<String> {
        if unit.ignored_modules.iter().any(|m| m == name)
            || unit.compiled_modules.iter().any(|m| m == name)
        {
            return Ok(String::new());
        }
        if stack.iter().any(|m| m == name) {
            tracing::warn!("[lx:resolver] Module cycle through {} ({})", name, stack.join(" -> "));
            return Ok(String::new());
        }
        if !unit.build_modules {
            if !unit.deferred_modules.iter().any(|m| m == name) {
                unit.deferred_modules.push(name.to_string());
                unit.assets.add_module(name);
            }
            return Ok(String::new());
        }

        let modules = self.compiler.modules();
        let Some(desc) = modules.get(name) else {
            unit.report(DiagnosticKind::Resolution, None, format!("module {} not found", name));
            return Ok(String::new());
        };
        let path = canonical_path(&modules.resolve_path(desc));
        let source = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                unit.report(
                    DiagnosticKind::Resolution,
                    Some(&path),
                    format!("module {} unreadable: {}", name, e),
                );
                return Ok(String::new());
            }
        };
        let i18n_file = desc.i18n_file().map(str::to_string);

        stack.push(name.to_string());
        let body = self.build_module(name, &path, &source, i18n_file.as_deref(), unit, stack);
        stack.pop();

        let (deps, body) = match body? {
            Some(parts) => parts,
            None => return Ok(String::new()),
        };
        if !unit.compiled_modules.iter().any(|m| m == name) {
            unit.compiled_modules.push(name.to_string());
        }
        tracing::debug!("[lx:resolver] Module {} compiled", name);
        Ok(format!("{}{}\n", deps, body))
    }

    fn build_module(
        &self,
        name: &str,
        path: &Path,
        source: &str,
        i18n_file: Option<&str>,
        unit: &mut CompileUnit,
        stack: &mut Vec<String>,
    ) -> Result<Option<(String, String)>> {
        let mut code = match self.compiler.inner_pass(source, Some(path), unit) {
            Ok(code) => code,
            Err(LxError::Structural(e)) => {
                unit.report(DiagnosticKind::Structural, Some(path), e.to_string());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        unit.mark_file_compiled(path);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        if let Some(file) = i18n_file {
            let file = dir.join(file);
            match I18nTable::load(&file) {
                Ok(table) => {
                    for (lang, key) in unit.module_i18n.merge_namespaced(name, &table) {
                        tracing::warn!("[lx:resolver] i18n conflict {}:{} in {:?}", lang, key, file);
                    }
                    code = i18n::namespace_references(&code, name);
                }
                Err(e) => unit.report(DiagnosticKind::Data, Some(&file), e.to_string()),
            }
        }

        let code = self.expand_requires(&code, &dir, unit)?;

        let nested: Vec<String> = USE_RE
            .captures_iter(&code)
            .flat_map(|c| {
                c[1].split(',')
                    .map(|n| n.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        let code = USE_RE.replace_all(&code, "").to_string();

        let mut deps = String::new();
        for dep in nested {
            deps.push_str(&self.use_module(&dep, unit, stack)?);
        }
        Ok(Some((deps, code)))
    }
}
