//! Parse Module for the lx template DSL
//!
//! Indentation based widget-tree markup. A single linear pass over the lines
//! keeps an explicit stack of open nodes; a node is attached to its parent
//! when it is closed and never touched again.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scan::{find_matching, skip_string};
use crate::validate::{
    CompilerError, ERR_BLOCK, ERR_DEPTH, ERR_GRAMMAR, ERR_HTML_MIX, ERR_INDENT,
};

// ═══════════════════════════════════════════════════════════════════════════════
// WIDGET REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

const BUILTIN_WIDGETS: &[&str] = &[
    "Box", "Rect", "TextBox", "Input", "Textarea", "Button", "Checkbox", "Radio", "Image",
    "Link", "Scroll", "Dropbox", "Table", "Matrix",
];

/// Known widget tags and the constructor each compiles to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetRegistry {
    tags: HashMap<String, String>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        let tags = BUILTIN_WIDGETS
            .iter()
            .map(|t| (t.to_string(), format!("lx.{}", t)))
            .collect();
        Self { tags }
    }
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self {
            tags: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, constructor: impl Into<String>) {
        self.tags.insert(tag.into(), constructor.into());
    }

    pub fn extend(&mut self, tags: &HashMap<String, String>) {
        for (tag, ctor) in tags {
            self.register(tag.clone(), ctor.clone());
        }
    }

    pub fn constructor(&self, tag: &str) -> Option<&str> {
        self.tags.get(tag).map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    pub tag: String,
    pub constructor: String,
    pub key: Option<String>,
    pub css: Vec<String>,
    pub geom: Option<Vec<String>>,
    pub volumetric: bool,
    pub field: Option<String>,
    pub matrix: Option<String>,
    pub config: Option<String>,
    pub methods: Vec<MethodCall>,
    pub data: Option<String>,
    pub text: Option<String>,
}

impl WidgetSpec {
    pub fn is_matrix(&self) -> bool {
        self.tag == "Matrix" || self.matrix.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "expr", rename_all = "lowercase")]
pub enum SyntaxKind {
    If(String),
    ElseIf(String),
    Else,
    For(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub name: String,
    pub link: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Widget(WidgetSpec),
    Syntax(SyntaxKind),
    Block(BlockSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub depth: usize,
    pub line: u32,
    pub children: Vec<Node>,
    pub html: Vec<String>,
}

impl Node {
    fn new(kind: NodeKind, depth: usize, line: u32) -> Self {
        Node {
            kind,
            depth,
            line,
            children: Vec::new(),
            html: Vec::new(),
        }
    }

    pub fn widget(&self) -> Option<&WidgetSpec> {
        match &self.kind {
            NodeKind::Widget(w) => Some(w),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref GEOM_VALUE_RE: Regex =
        Regex::new(r"^-?\d+(?:\.\d+)?(?:px|%|em|rem|vw|vh)?$").unwrap();
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_$][\w$\-]*").unwrap();
}

#[derive(Clone, Copy)]
enum State {
    OutsideHtml,
    /// Lines deeper than `depth` belong to the raw buffer of the stack top.
    InsideHtml { depth: usize, indent: usize },
}

pub struct TemplateParser<'a> {
    widgets: &'a WidgetRegistry,
    file: String,
    line_offset: u32,
}

impl<'a> TemplateParser<'a> {
    pub fn new(widgets: &'a WidgetRegistry, file: &str) -> Self {
        Self {
            widgets,
            file: file.to_string(),
            line_offset: 0,
        }
    }

    /// Line numbers of errors are reported relative to the enclosing file.
    pub fn with_line_offset(mut self, offset: u32) -> Self {
        self.line_offset = offset;
        self
    }

    fn error(&self, code: &str, message: &str, line: u32, text: &str) -> CompilerError {
        CompilerError::at_line(code, message, &self.file, line, text)
    }

    pub fn parse(&self, text: &str) -> Result<Vec<Node>, CompilerError> {
        let lines: Vec<(u32, &str)> = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| (self.line_offset + i as u32 + 1, l.trim_end()))
            .collect();

        let Some(&(_, first)) = lines.first() else {
            return Ok(Vec::new());
        };
        let base = leading_ws(first);
        let mut unit: Option<usize> = None;
        let mut stack: Vec<Node> = Vec::new();
        let mut roots: Vec<Node> = Vec::new();
        let mut state = State::OutsideHtml;
        let mut prev_depth: Option<usize> = None;

        for (line_no, raw) in lines {
            let indent = leading_ws(raw);
            if indent < base {
                return Err(self.error(
                    ERR_INDENT,
                    "line is indented less than the template base",
                    line_no,
                    raw,
                ));
            }
            let rel = indent - base;
            if rel > 0 && unit.is_none() {
                unit = Some(rel);
            }
            let depth = match unit {
                Some(u) if rel > 0 => {
                    if rel % u != 0 {
                        return Err(self.error(
                            ERR_INDENT,
                            &format!("indentation {} is not a multiple of the shift unit {}", rel, u),
                            line_no,
                            raw,
                        ));
                    }
                    rel / u
                }
                _ => 0,
            };

            if let State::InsideHtml {
                depth: html_depth,
                indent: html_indent,
            } = state
            {
                if depth > html_depth {
                    if let Some(owner) = stack.last_mut() {
                        let kept = raw.get(html_indent..).unwrap_or_else(|| raw.trim_start());
                        owner.html.push(kept.to_string());
                    }
                    continue;
                }
                state = State::OutsideHtml;
            }

            let max_depth = prev_depth.map(|d| d + 1).unwrap_or(0);
            if depth > max_depth {
                return Err(self.error(
                    ERR_DEPTH,
                    &format!("line at depth {} where at most {} is allowed", depth, max_depth),
                    line_no,
                    raw,
                ));
            }
            prev_depth = Some(depth);

            close_to_depth(&mut stack, &mut roots, depth);
            let content = raw.trim();

            match self.classify(content, depth, line_no)? {
                Some(node) => {
                    if let Some(parent) = stack.last() {
                        self.check_parent_accepts_child(parent, line_no, raw)?;
                    }
                    stack.push(node);
                }
                None => {
                    let owner = match stack.last_mut() {
                        Some(owner) => owner,
                        None => {
                            return Err(self.error(
                                ERR_HTML_MIX,
                                "raw HTML outside of any widget",
                                line_no,
                                raw,
                            ))
                        }
                    };
                    match &owner.kind {
                        NodeKind::Widget(_) if !owner.children.is_empty() => {
                            return Err(self.error(
                                ERR_HTML_MIX,
                                "widget holds both raw HTML and nested widgets",
                                line_no,
                                raw,
                            ))
                        }
                        NodeKind::Block(_) => {
                            return Err(self.error(
                                ERR_HTML_MIX,
                                "raw HTML directly inside a block",
                                line_no,
                                raw,
                            ))
                        }
                        _ => {}
                    }
                    owner.html.push(content.to_string());
                    state = State::InsideHtml { depth, indent };
                }
            }
        }

        close_to_depth(&mut stack, &mut roots, 0);
        Ok(roots)
    }

    fn check_parent_accepts_child(&self, parent: &Node, line: u32, raw: &str) -> Result<(), CompilerError> {
        match &parent.kind {
            NodeKind::Widget(_) if !parent.html.is_empty() => Err(self.error(
                ERR_HTML_MIX,
                "widget holds both raw HTML and nested widgets",
                line,
                raw,
            )),
            NodeKind::Block(b) if b.link => Err(self.error(
                ERR_BLOCK,
                &format!("block link &{} cannot have children", b.name),
                line,
                raw,
            )),
            _ => Ok(()),
        }
    }

    /// `None` means the line is raw HTML.
    fn classify(&self, content: &str, depth: usize, line: u32) -> Result<Option<Node>, CompilerError> {
        if let Some(kind) = self.parse_syntax(content, line)? {
            return Ok(Some(Node::new(NodeKind::Syntax(kind), depth, line)));
        }
        if !content.starts_with('<') {
            return Ok(None);
        }

        let rest = &content[1..];
        if let Some(marker) = rest.chars().next().filter(|c| *c == '*' || *c == '&') {
            let name_part = &rest[1..];
            let name = IDENT_RE
                .find(name_part)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| self.error(ERR_GRAMMAR, "block without a name", line, content))?;
            if name_part[name.len()..].trim() != ">" {
                return Err(self.error(ERR_GRAMMAR, "malformed block tag", line, content));
            }
            let link = marker == '&';
            if !link && depth != 0 {
                return Err(self.error(
                    ERR_BLOCK,
                    &format!("block *{} must be defined at depth 0", name),
                    line,
                    content,
                ));
            }
            return Ok(Some(Node::new(
                NodeKind::Block(BlockSpec { name, link }),
                depth,
                line,
            )));
        }

        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let tag = &rest[..tag_len];
        let Some(constructor) = self.widgets.constructor(tag) else {
            return Ok(None);
        };

        let mut spec = WidgetSpec {
            tag: tag.to_string(),
            constructor: constructor.to_string(),
            ..WidgetSpec::default()
        };
        self.parse_widget_tokens(&rest[tag_len..], &mut spec, line, content)?;
        Ok(Some(Node::new(NodeKind::Widget(spec), depth, line)))
    }

    fn parse_syntax(&self, content: &str, line: u32) -> Result<Option<SyntaxKind>, CompilerError> {
        let (head, tail) = match content.find(char::is_whitespace) {
            Some(i) => (&content[..i], content[i..].trim()),
            None => (content, ""),
        };
        let expr = tail.strip_suffix(':').unwrap_or(tail).trim().to_string();
        let head = head.strip_suffix(':').unwrap_or(head);
        let kind = match head {
            "if" => SyntaxKind::If(expr),
            "elseif" => SyntaxKind::ElseIf(expr),
            "for" => SyntaxKind::For(expr),
            "else" => {
                if !expr.is_empty() {
                    return Err(self.error(ERR_GRAMMAR, "`else` takes no condition", line, content));
                }
                return Ok(Some(SyntaxKind::Else));
            }
            _ => return Ok(None),
        };
        match &kind {
            SyntaxKind::If(e) | SyntaxKind::ElseIf(e) | SyntaxKind::For(e) if e.is_empty() => Err(
                self.error(ERR_GRAMMAR, &format!("`{}` without expression", head), line, content),
            ),
            _ => Ok(Some(kind)),
        }
    }

    fn parse_widget_tokens(
        &self,
        inner: &str,
        spec: &mut WidgetSpec,
        line: u32,
        content: &str,
    ) -> Result<(), CompilerError> {
        let bytes = inner.as_bytes();
        let unbalanced = || self.error(ERR_GRAMMAR, "unbalanced brackets in widget line", line, content);
        let mut i = 0;
        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(self.error(ERR_GRAMMAR, "widget tag is not closed with `>`", line, content));
            }
            match bytes[i] {
                b'>' => {
                    if !inner[i + 1..].trim().is_empty() {
                        return Err(self.error(ERR_GRAMMAR, "text after widget tag", line, content));
                    }
                    return Ok(());
                }
                b'@' => {
                    let name = self.ident_at(inner, i + 1, line, content)?;
                    i += 1 + name.len();
                    spec.key = Some(name);
                }
                b'.' => {
                    let name = self.ident_at(inner, i + 1, line, content)?;
                    i += 1 + name.len();
                    spec.css.push(name);
                }
                b'#' => {
                    let name = self.ident_at(inner, i + 1, line, content)?;
                    let open = i + 1 + name.len();
                    if bytes.get(open) != Some(&b'(') {
                        return Err(self.error(ERR_GRAMMAR, "method call without arguments", line, content));
                    }
                    let close = find_matching(inner, open).ok_or_else(unbalanced)?;
                    spec.methods.push(MethodCall {
                        name,
                        args: inner[open + 1..close].trim().to_string(),
                    });
                    i = close + 1;
                }
                b'[' => {
                    let close = find_matching(inner, i).ok_or_else(unbalanced)?;
                    self.parse_geometry(inner[i + 1..close].trim(), spec, line, content)?;
                    i = close + 1;
                }
                b'(' => {
                    let close = find_matching(inner, i).ok_or_else(unbalanced)?;
                    spec.config = Some(inner[i + 1..close].trim().to_string());
                    i = close + 1;
                }
                b'{' => {
                    let close = find_matching(inner, i).ok_or_else(unbalanced)?;
                    spec.data = Some(inner[i..=close].to_string());
                    i = close + 1;
                }
                b'"' | b'\'' => {
                    let end = skip_string(bytes, i);
                    if end > bytes.len() || bytes[end - 1] != bytes[i] || end - i < 2 {
                        return Err(self.error(ERR_GRAMMAR, "unterminated text literal", line, content));
                    }
                    spec.text = Some(inner[i + 1..end - 1].to_string());
                    i = end;
                }
                _ => {
                    let c = inner[i..].chars().next().unwrap_or('?');
                    return Err(self.error(
                        ERR_GRAMMAR,
                        &format!("unexpected character '{}' in widget line", c),
                        line,
                        content,
                    ));
                }
            }
        }
    }

    fn ident_at(&self, inner: &str, at: usize, line: u32, content: &str) -> Result<String, CompilerError> {
        IDENT_RE
            .find(&inner[at.min(inner.len())..])
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| self.error(ERR_GRAMMAR, "expected a name", line, content))
    }

    fn parse_geometry(&self, geom: &str, spec: &mut WidgetSpec, line: u32, content: &str) -> Result<(), CompilerError> {
        if geom == "_" {
            spec.volumetric = true;
            return Ok(());
        }
        if let Some(name) = geom.strip_prefix("f:") {
            spec.field = Some(name.trim().to_string());
            return Ok(());
        }
        if let Some(name) = geom.strip_prefix("m:") {
            spec.matrix = Some(name.trim().to_string());
            return Ok(());
        }
        let parts: Vec<String> = geom.split(':').map(|p| p.trim().to_string()).collect();
        if parts.len() > 4 || parts.iter().any(|p| !GEOM_VALUE_RE.is_match(p)) {
            return Err(self.error(
                ERR_GRAMMAR,
                &format!("invalid geometry [{}]", geom),
                line,
                content,
            ));
        }
        spec.geom = Some(parts);
        Ok(())
    }
}

fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn close_to_depth(stack: &mut Vec<Node>, roots: &mut Vec<Node>, depth: usize) {
    while stack.last().map(|n| n.depth >= depth).unwrap_or(false) {
        if let Some(node) = stack.pop() {
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => roots.push(node),
            }
        }
    }
}
