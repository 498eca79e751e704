use oxc_allocator::Allocator;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_INDENT: &str = "LX-ERR-INDENT";
pub const ERR_DEPTH: &str = "LX-ERR-DEPTH";
pub const ERR_GRAMMAR: &str = "LX-ERR-GRAMMAR";
pub const ERR_HTML_MIX: &str = "LX-ERR-HTML-MIX";
pub const ERR_BLOCK: &str = "LX-ERR-BLOCK";
pub const ERR_MATRIX: &str = "LX-ERR-MATRIX";
pub const ERR_SYNTAX_ORDER: &str = "LX-ERR-SYNTAX-ORDER";
pub const ERR_BRACE: &str = "LX-ERR-BRACE";
pub const ERR_CLASS: &str = "LX-ERR-CLASS";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_INDENT => "Every template line is indented by a whole number of shift units.",
        ERR_DEPTH => "A template line is at most one level deeper than its predecessor.",
        ERR_GRAMMAR => "Widget lines consist only of recognised tokens.",
        ERR_HTML_MIX => {
            "Raw HTML belongs to a widget or control node, and never next to nested widgets."
        }
        ERR_BLOCK => "Block definitions live at depth 0 and every link names a defined block.",
        ERR_MATRIX => "A matrix renders exactly one child widget per item.",
        ERR_SYNTAX_ORDER => "`elseif` and `else` directly follow an `if` or `elseif`.",
        ERR_BRACE => "Class bodies and call argument lists are brace balanced.",
        ERR_CLASS => "Class headers name the class being declared.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message} ({file}:{line})")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: "STRUCTURAL_PARSE_ERROR".to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
        }
    }

    /// Error anchored to a template line; the offending text goes to `context`.
    pub fn at_line(code: &str, message: &str, file: &str, line: u32, text: &str) -> Self {
        Self::with_details(code, message, file, line, 1, Some(text.to_string()), vec![])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILED SCRIPT CHECK
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse compiled output and return the syntax errors found, if any.
///
/// Snippet scripts end with a top-level `return`, so returns outside a
/// function body are accepted.
pub fn check_script_syntax(code: &str) -> Vec<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::default();
    let options = ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };
    let ret = Parser::new(&allocator, code, source_type)
        .with_options(options)
        .parse();

    ret.errors.iter().map(|e| e.to_string()).collect()
}
