//! Class sugar: `@lx:const` static accessors and `@lx:namespace` registration guards.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::scan::find_matching;
use crate::validate::{CompilerError, ERR_BRACE, ERR_CLASS};

lazy_static! {
    static ref NAMESPACE_RE: Regex = Regex::new(r"@lx:namespace\s+([\w.$]+)\s*;").unwrap();
    static ref LOOSE_CLASS_RE: Regex = Regex::new(
        r"(?m)(?:^[ \t]*(?:export[ \t]+(?:default[ \t]+)?)?|[=(,:?][ \t]*|\breturn[ \t]+)class\b[^\n{]*\{"
    )
    .unwrap();
    static ref STRICT_CLASS_RE: Regex = Regex::new(
        r"^[ \t]*class\s+([A-Za-z_$][\w$]*)(?:\s+extends\s+([A-Za-z_$][\w$.]*))?\s*\{$"
    )
    .unwrap();
    static ref EXPR_CLASS_RE: Regex = Regex::new(
        r"^(?:[ \t]*export[ \t]+(?:default[ \t]+)?|[=(,:?][ \t]*|return[ \t]+)class(?:\s+([A-Za-z_$][\w$]*))?(?:\s+extends\s+([A-Za-z_$][\w$.]*))?\s*\{$"
    )
    .unwrap();
    static ref CONST_RE: Regex =
        Regex::new(r"@lx:const\s+([A-Za-z_$][\w$]*)\s*=\s*([^;]+);").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
}

impl ClassInfo {
    /// Parent name without its namespace qualification.
    pub fn parent_short_name(&self) -> Option<&str> {
        self.parent
            .as_deref()
            .map(|p| p.rsplit('.').next().unwrap_or(p))
    }
}

enum Event {
    Namespace { start: usize, end: usize, ns: String },
    Class { start: usize, brace: usize },
}

impl Event {
    fn start(&self) -> usize {
        match self {
            Event::Namespace { start, .. } | Event::Class { start, .. } => *start,
        }
    }
}

/// Result of the class sugar pass: rewritten code plus the malformed class
/// headers that were left untouched.
pub struct SugarOutput {
    pub code: String,
    pub malformed: Vec<String>,
}

/// Rewrite class sugar in `code`. Unbalanced class bodies are fatal for the pass.
pub fn rewrite(code: &str, file: &str) -> Result<SugarOutput, CompilerError> {
    let mut events: Vec<Event> = NAMESPACE_RE
        .captures_iter(code)
        .filter_map(|c| {
            let m = c.get(0)?;
            Some(Event::Namespace {
                start: m.start(),
                end: m.end(),
                ns: c[1].to_string(),
            })
        })
        .collect();
    events.extend(LOOSE_CLASS_RE.find_iter(code).map(|m| Event::Class {
        start: m.start(),
        brace: m.end() - 1,
    }));
    events.sort_by_key(Event::start);

    let mut out = String::with_capacity(code.len());
    let mut malformed = Vec::new();
    let mut namespace: Option<String> = None;
    let mut cursor = 0;

    for event in events {
        if event.start() < cursor {
            continue;
        }
        match event {
            Event::Namespace { start, end, ns } => {
                out.push_str(&rewrite_loose_consts(&code[cursor..start]));
                namespace = Some(ns);
                cursor = end;
            }
            Event::Class { start, brace } => {
                let header = &code[start..=brace];
                let kind = classify_header(header);
                let close = find_matching(code, brace);
                let Some(close) = close else {
                    if let Header::Malformed = kind {
                        malformed.push(header.trim().to_string());
                        continue;
                    }
                    let line = code[..start].matches('\n').count() as u32 + 1;
                    let message = match &kind {
                        Header::Declaration(name) => format!("unbalanced body of class {}", name),
                        _ => "unbalanced class body".to_string(),
                    };
                    return Err(CompilerError::at_line(
                        ERR_BRACE,
                        &message,
                        file,
                        line,
                        header.trim(),
                    ));
                };

                out.push_str(&rewrite_loose_consts(&code[cursor..start]));
                let text = &code[start..=close];
                match kind {
                    Header::Declaration(name) => {
                        let body = rewrite_class_consts(text);
                        match &namespace {
                            Some(ns) => out.push_str(&wrap_in_namespace(ns, &name, &body)),
                            None => out.push_str(&body),
                        }
                    }
                    // Exported and expression classes cannot sit inside the
                    // registration guard.
                    Header::Expression => out.push_str(&rewrite_class_consts(text)),
                    // `@lx:const` stays untouched inside a header we cannot read.
                    Header::Malformed => {
                        malformed.push(header.trim().to_string());
                        out.push_str(text);
                    }
                }
                cursor = close + 1;
            }
        }
    }
    out.push_str(&rewrite_loose_consts(&code[cursor..]));

    Ok(SugarOutput {
        code: out,
        malformed,
    })
}

enum Header {
    Declaration(String),
    Expression,
    Malformed,
}

fn classify_header(header: &str) -> Header {
    if let Some(caps) = STRICT_CLASS_RE.captures(header) {
        Header::Declaration(caps[1].to_string())
    } else if EXPR_CLASS_RE.is_match(header) {
        Header::Expression
    } else {
        Header::Malformed
    }
}

/// Name and parent of a recognised class header.
fn header_info(header: &str) -> Option<ClassInfo> {
    let caps = STRICT_CLASS_RE
        .captures(header)
        .or_else(|| EXPR_CLASS_RE.captures(header))?;
    Some(ClassInfo {
        name: caps.get(1)?.as_str().to_string(),
        parent: caps.get(2).map(|p| p.as_str().to_string()),
    })
}

fn rewrite_class_consts(class_text: &str) -> String {
    CONST_RE
        .replace_all(class_text, "static get $1() { return $2; }")
        .to_string()
}

fn rewrite_loose_consts(text: &str) -> String {
    CONST_RE.replace_all(text, "const $1 = $2;").to_string()
}

fn wrap_in_namespace(ns: &str, name: &str, class_text: &str) -> String {
    format!(
        "(function(){{const __ns__=lx.createNamespace('{ns}');if(__ns__.{name}!==undefined)return;\n{body}\n__ns__.{name}={name};if({name}.__afterDefinition){name}.__afterDefinition();\n}})();",
        ns = ns,
        name = name,
        body = class_text
    )
}

/// Declared classes of already rewritten code, in declaration order.
pub fn discover_classes(code: &str) -> Vec<ClassInfo> {
    LOOSE_CLASS_RE
        .find_iter(code)
        .filter_map(|m| header_info(m.as_str()))
        .collect()
}

pub fn malformed_error(file: &str, header: &str) -> CompilerError {
    CompilerError::new(ERR_CLASS, &format!("malformed class header `{}`", header), file, 0, 0)
}
