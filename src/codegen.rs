//! Codegen module for the lx template DSL
//!
//! Turns a parsed [`Node`] tree into plain script. Blocks become local
//! functions emitted ahead of the root nodes, which compile in declaration order.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::parse::{BlockSpec, Node, NodeKind, SyntaxKind, WidgetSpec};
use crate::scan::js_string;
use crate::validate::{CompilerError, ERR_BLOCK, ERR_MATRIX, ERR_SYNTAX_ORDER};

lazy_static! {
    static ref FOR_UPPER_RE: Regex = Regex::new(r"^([A-Za-z_$][\w$]*)\s+to\s+(.+)$").unwrap();
    static ref FOR_RANGE_RE: Regex =
        Regex::new(r"^([A-Za-z_$][\w$]*)\s+from\s+(.+?)\s+to\s+(.+)$").unwrap();
    static ref PLAIN_NUMBER_RE: Regex = Regex::new(r"^-?\d+(?:\.\d+)?$").unwrap();
}

pub struct TemplateCompiler {
    file: String,
    out_var: Option<String>,
    counter: usize,
    blocks: HashSet<String>,
}

impl TemplateCompiler {
    pub fn new(file: &str, out_var: Option<&str>) -> Self {
        Self {
            file: file.to_string(),
            out_var: out_var.map(str::to_string),
            counter: 0,
            blocks: HashSet::new(),
        }
    }

    fn error(&self, code: &str, message: &str, node: &Node) -> CompilerError {
        CompilerError::new(code, message, &self.file, node.line, 1)
    }

    pub fn compile(&mut self, roots: &[Node]) -> Result<String, CompilerError> {
        let (defs, nodes): (Vec<&Node>, Vec<&Node>) = roots
            .iter()
            .partition(|n| matches!(&n.kind, NodeKind::Block(b) if !b.link));

        for def in &defs {
            if let NodeKind::Block(b) = &def.kind {
                if !self.blocks.insert(b.name.clone()) {
                    return Err(self.error(ERR_BLOCK, &format!("block *{} defined twice", b.name), def));
                }
            }
        }

        let mut body = String::new();
        for def in defs {
            if let NodeKind::Block(b) = &def.kind {
                body.push_str(&format!("function __lxBlock_{}(__parent) {{\n", b.name));
                body.push_str(&self.compile_nodes(&def.children, Some("__parent"), false)?);
                body.push_str("}\n");
            }
        }
        let owned: Vec<Node> = nodes.into_iter().cloned().collect();
        body.push_str(&self.compile_nodes(&owned, None, true)?);

        Ok(match &self.out_var {
            Some(out) => format!(
                "const {} = (function(){{\nconst __out = {{}};\nfunction _out(k, w) {{ __out[k] = w; }}\n{}return __out;\n}})();",
                out, body
            ),
            None => format!("(function(){{\n{}}})();", body),
        })
    }

    fn compile_nodes(&mut self, nodes: &[Node], parent: Option<&str>, top: bool) -> Result<String, CompilerError> {
        let mut out = String::new();
        let mut after_if = false;
        for node in nodes {
            match &node.kind {
                NodeKind::Syntax(SyntaxKind::ElseIf(_)) | NodeKind::Syntax(SyntaxKind::Else) if !after_if => {
                    return Err(self.error(
                        ERR_SYNTAX_ORDER,
                        "`elseif`/`else` without a preceding `if`",
                        node,
                    ));
                }
                _ => {}
            }
            after_if = matches!(
                &node.kind,
                NodeKind::Syntax(SyntaxKind::If(_)) | NodeKind::Syntax(SyntaxKind::ElseIf(_))
            );
            out.push_str(&self.compile_node(node, parent, top)?);
        }
        Ok(out)
    }

    fn compile_node(&mut self, node: &Node, parent: Option<&str>, top: bool) -> Result<String, CompilerError> {
        match &node.kind {
            NodeKind::Widget(w) => self.compile_widget(w, node, parent, top),
            NodeKind::Syntax(s) => self.compile_syntax(s, node, parent, top),
            NodeKind::Block(b) => self.compile_link(b, node, parent),
        }
    }

    fn compile_widget(
        &mut self,
        w: &WidgetSpec,
        node: &Node,
        parent: Option<&str>,
        top: bool,
    ) -> Result<String, CompilerError> {
        let var = format!("__w{}", self.counter);
        self.counter += 1;

        let mut conf: Vec<String> = Vec::new();
        if let Some(p) = parent {
            conf.push(format!("parent:{}", p));
        }
        if let Some(key) = &w.key {
            conf.push(format!("key:{}", js_string(key)));
        }
        if !w.css.is_empty() {
            let classes: Vec<String> = w.css.iter().map(|c| js_string(c)).collect();
            conf.push(format!("css:[{}]", classes.join(",")));
        }
        if let Some(geom) = &w.geom {
            let values: Vec<String> = geom.iter().map(|v| geom_value(v)).collect();
            conf.push(format!("geom:[{}]", values.join(",")));
        } else if w.volumetric {
            conf.push("geom:true".to_string());
        }
        if let Some(field) = &w.field {
            conf.push(format!("field:{}", js_string(field)));
        }
        if let Some(matrix) = &w.matrix {
            conf.push(format!("matrix:{}", js_string(matrix)));
        }
        if let Some(text) = &w.text {
            conf.push(format!("text:{}", js_string(text)));
        }
        if let Some(data) = &w.data {
            conf.push(format!("data:{}", data));
        }
        if let Some(config) = w.config.as_ref().filter(|c| !c.is_empty()) {
            conf.push(config.clone());
        }
        if !node.html.is_empty() {
            conf.push(format!("html:{}", js_string(&node.html.join("\n"))));
        }

        let mut out = format!("const {} = new {}({{{}}});\n", var, w.constructor, conf.join(", "));
        for m in &w.methods {
            out.push_str(&format!("{}.{}({});\n", var, m.name, m.args));
        }
        if self.out_var.is_some() {
            if let Some(key) = w.key.as_ref().or(w.field.as_ref()) {
                out.push_str(&format!("_out({}, {});\n", js_string(key), var));
            }
        }

        if w.is_matrix() {
            let widgets: Vec<&Node> = node.children.iter().filter(|c| c.widget().is_some()).collect();
            if widgets.len() != 1 || node.children.len() != 1 {
                return Err(self.error(
                    ERR_MATRIX,
                    &format!("matrix needs exactly one child widget, found {}", node.children.len()),
                    node,
                ));
            }
            out.push_str(&format!("{}.setItemRender((__item) => {{\n", var));
            out.push_str(&self.compile_node(widgets[0], Some("__item"), false)?);
            out.push_str("});\n");
        } else if !node.children.is_empty() {
            if top {
                out.push_str(&format!("{}.begin();\n", var));
                out.push_str(&self.compile_nodes(&node.children, None, false)?);
                out.push_str(&format!("{}.end();\n", var));
            } else {
                out.push_str(&self.compile_nodes(&node.children, Some(&var), false)?);
            }
        }
        Ok(out)
    }

    fn compile_syntax(
        &mut self,
        s: &SyntaxKind,
        node: &Node,
        parent: Option<&str>,
        top: bool,
    ) -> Result<String, CompilerError> {
        let head = match s {
            SyntaxKind::If(c) => format!("if ({}) {{\n", c),
            SyntaxKind::ElseIf(c) => format!("else if ({}) {{\n", c),
            SyntaxKind::Else => "else {\n".to_string(),
            SyntaxKind::For(expr) => for_header(expr),
        };
        let mut out = head;
        out.push_str(&self.compile_nodes(&node.children, parent, top)?);
        if !node.html.is_empty() {
            let target = parent.unwrap_or("lx");
            out.push_str(&format!(
                "{}.insertHtml({});\n",
                target,
                js_string(&node.html.join("\n"))
            ));
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn compile_link(&self, b: &BlockSpec, node: &Node, parent: Option<&str>) -> Result<String, CompilerError> {
        if !self.blocks.contains(&b.name) {
            return Err(self.error(ERR_BLOCK, &format!("link to undefined block *{}", b.name), node));
        }
        if !node.children.is_empty() {
            return Err(self.error(ERR_BLOCK, &format!("block link &{} has children", b.name), node));
        }
        Ok(format!("__lxBlock_{}({});\n", b.name, parent.unwrap_or("null")))
    }
}

fn for_header(expr: &str) -> String {
    if let Some(c) = FOR_RANGE_RE.captures(expr) {
        return format!(
            "for (let {v} = {a}; {v} <= {b}; {v}++) {{\n",
            v = &c[1],
            a = c[2].trim(),
            b = c[3].trim()
        );
    }
    if let Some(c) = FOR_UPPER_RE.captures(expr) {
        return format!("for (let {v} = 0; {v} < {n}; {v}++) {{\n", v = &c[1], n = c[2].trim());
    }
    format!("for ({}) {{\n", expr)
}

fn geom_value(v: &str) -> String {
    if PLAIN_NUMBER_RE.is_match(v) {
        v.to_string()
    } else {
        js_string(v)
    }
}
