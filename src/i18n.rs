//! Translation tables and the `lx(i18n).key` substitution pass.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{read_source, LxError, Result};
use crate::scan::js_string;

lazy_static! {
    static ref I18N_REF_RE: Regex = Regex::new(
        r"lx\(i18n(?::([\w.\-]+))?\)\.([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)"
    )
    .unwrap();
    static ref PLAIN_I18N_RE: Regex = Regex::new(r"lx\(i18n\)\.").unwrap();
}

/// `language -> key -> text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct I18nTable {
    langs: BTreeMap<String, BTreeMap<String, String>>,
}

impl I18nTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{lang: {key: text}}` document. YAML for `.yaml`/`.yml`, JSON otherwise.
    /// Nested objects flatten to dotted keys.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_source(path)?;
        let value: serde_json::Value = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        let langs = value.as_object().ok_or_else(|| {
            LxError::data(path.to_string_lossy(), "translation file root must be a map")
        })?;

        let mut table = I18nTable::new();
        for (lang, entries) in langs {
            let mut flat = BTreeMap::new();
            flatten_into(&mut flat, "", entries);
            table.langs.insert(lang.clone(), flat);
        }
        Ok(table)
    }

    pub fn insert(&mut self, lang: &str, key: &str, text: &str) {
        self.langs
            .entry(lang.to_string())
            .or_default()
            .insert(key.to_string(), text.to_string());
    }

    pub fn get(&self, lang: &str, key: &str) -> Option<&str> {
        self.langs.get(lang)?.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.langs.values().all(BTreeMap::is_empty)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.langs.keys().map(String::as_str)
    }

    /// Merge `other` in; existing entries win. Returns the conflicting
    /// `(lang, key)` pairs whose texts differ.
    pub fn merge(&mut self, other: &I18nTable) -> Vec<(String, String)> {
        self.merge_with_prefix(None, other)
    }

    /// Merge `other` with every key prefixed by `namespace.`.
    pub fn merge_namespaced(&mut self, namespace: &str, other: &I18nTable) -> Vec<(String, String)> {
        self.merge_with_prefix(Some(namespace), other)
    }

    fn merge_with_prefix(&mut self, prefix: Option<&str>, other: &I18nTable) -> Vec<(String, String)> {
        let mut conflicts = Vec::new();
        for (lang, entries) in &other.langs {
            let target = self.langs.entry(lang.clone()).or_default();
            for (key, text) in entries {
                let key = match prefix {
                    Some(ns) => format!("{}.{}", ns, key),
                    None => key.clone(),
                };
                match target.get(&key) {
                    Some(existing) if existing != text => conflicts.push((lang.clone(), key)),
                    Some(_) => {}
                    None => {
                        target.insert(key, text.clone());
                    }
                }
            }
        }
        conflicts
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(out, &key, v);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        serde_json::Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Rewrite plain `lx(i18n).key` references of a module's code into the
/// module-namespaced form `lx(i18n:Module).key`.
pub fn namespace_references(code: &str, module: &str) -> String {
    PLAIN_I18N_RE
        .replace_all(code, format!("lx(i18n:{}).", module).as_str())
        .to_string()
}

/// Replace every i18n lookup with a string literal: the translation for
/// `lang` when one exists, otherwise the key itself.
///
/// Namespaced lookups consult the module table under `ns.key` first; plain
/// lookups consult the plugin table first. The longest dotted prefix that
/// resolves wins; a trailing segment followed by `(` is treated as a method.
pub fn substitute(
    text: &str,
    lang: &str,
    module: &I18nTable,
    plugin: Option<&I18nTable>,
) -> String {
    I18N_REF_RE
        .replace_all(text, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let namespace = caps.get(1).map(|m| m.as_str());
            let path = &caps[2];
            let segments: Vec<&str> = path.split('.').collect();

            let lookup = |key: &str| -> Option<String> {
                let mut order: Vec<Option<&str>> = Vec::new();
                if let Some(ns) = namespace {
                    order.push(module.get(lang, &format!("{}.{}", ns, key)));
                    order.push(plugin.and_then(|p| p.get(lang, key)));
                } else {
                    order.push(plugin.and_then(|p| p.get(lang, key)));
                    order.push(module.get(lang, key));
                }
                order.into_iter().flatten().next().map(str::to_string)
            };

            for n in (1..=segments.len()).rev() {
                let key = segments[..n].join(".");
                if let Some(found) = lookup(&key) {
                    return with_rest(js_string(&found), &segments[n..]);
                }
            }

            let called = text[whole..].starts_with('(');
            let n = if called && segments.len() > 1 {
                segments.len() - 1
            } else {
                segments.len()
            };
            with_rest(js_string(&segments[..n].join(".")), &segments[n..])
        })
        .to_string()
}

fn with_rest(literal: String, rest: &[&str]) -> String {
    if rest.is_empty() {
        literal
    } else {
        format!("{}.{}", literal, rest.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> I18nTable {
        let mut t = I18nTable::new();
        t.insert("en", "greet", "Hi");
        t
    }

    #[test]
    fn test_translation_and_fallback() {
        let t = table();
        let code = "let s = lx(i18n).greet;";
        assert_eq!(substitute(code, "en", &t, None), "let s = \"Hi\";");
        assert_eq!(substitute(code, "de", &t, None), "let s = \"greet\";");
    }

    #[test]
    fn test_method_call_after_key() {
        let t = I18nTable::new();
        let code = "lx(i18n).greet.toUpperCase()";
        assert_eq!(substitute(code, "en", &t, None), "\"greet\".toUpperCase()");
        let t = table();
        assert_eq!(substitute(code, "en", &t, None), "\"Hi\".toUpperCase()");
    }

    #[test]
    fn test_namespaced_lookup() {
        let mut module = I18nTable::new();
        module.merge_namespaced("lx.Box", &table());
        let code = namespace_references("lx(i18n).greet", "lx.Box");
        assert_eq!(code, "lx(i18n:lx.Box).greet");
        assert_eq!(substitute(&code, "en", &module, None), "\"Hi\"");
        assert_eq!(substitute(&code, "fr", &module, None), "\"greet\"");
    }

    #[test]
    fn test_merge_reports_conflicts() {
        let mut a = table();
        let mut b = I18nTable::new();
        b.insert("en", "greet", "Hello");
        b.insert("en", "bye", "Bye");
        let conflicts = a.merge(&b);
        assert_eq!(conflicts, vec![("en".to_string(), "greet".to_string())]);
        assert_eq!(a.get("en", "greet"), Some("Hi"));
        assert_eq!(a.get("en", "bye"), Some("Bye"));
    }
}
