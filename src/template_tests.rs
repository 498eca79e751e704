//! Template DSL tests: parser state machine and script generation.

#[cfg(test)]
mod tests {
    use crate::codegen::TemplateCompiler;
    use crate::parse::{NodeKind, SyntaxKind, TemplateParser, WidgetRegistry};
    use crate::validate::{
        CompilerError, ERR_BLOCK, ERR_DEPTH, ERR_GRAMMAR, ERR_HTML_MIX, ERR_INDENT, ERR_MATRIX,
        ERR_SYNTAX_ORDER,
    };

    fn compile(text: &str, out: Option<&str>) -> Result<String, CompilerError> {
        let widgets = WidgetRegistry::default();
        let nodes = TemplateParser::new(&widgets, "view.js").parse(text)?;
        TemplateCompiler::new("view.js", out).compile(&nodes)
    }

    fn parse_err(text: &str) -> CompilerError {
        let widgets = WidgetRegistry::default();
        TemplateParser::new(&widgets, "view.js")
            .parse(text)
            .expect_err("template should not parse")
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PARSER
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_widget_tokens_any_order() {
        let widgets = WidgetRegistry::default();
        let nodes = TemplateParser::new(&widgets, "v.js")
            .parse(r#"<Button #on('click', go) "Save" .primary [0:0:10:2] @save .wide>"#)
            .unwrap();
        let w = nodes[0].widget().unwrap();
        assert_eq!(w.key.as_deref(), Some("save"));
        assert_eq!(w.css, vec!["primary", "wide"]);
        assert_eq!(w.text.as_deref(), Some("Save"));
        assert_eq!(w.geom.as_ref().unwrap(), &vec!["0", "0", "10", "2"]);
        assert_eq!(w.methods[0].name, "on");
        assert_eq!(w.methods[0].args, "'click', go");
    }

    #[test]
    fn test_tree_depths_follow_shift_unit() {
        let widgets = WidgetRegistry::default();
        let text = "
            <Box @a>
                <Box @b>
                    <Button @c>
                <Box @d>
            <Box @e>
        ";
        let nodes = TemplateParser::new(&widgets, "v.js").parse(text).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].children.len(), 2);
        assert_eq!(nodes[0].children[0].children[0].widget().unwrap().key.as_deref(), Some("c"));
        assert_eq!(nodes[0].children[1].depth, 1);
    }

    #[test]
    fn test_non_multiple_indent_is_rejected() {
        let err = parse_err("<Box>\n    <Box>\n      <Button>\n");
        assert_eq!(err.code, ERR_INDENT);
        assert_eq!(err.line, 3);
        assert_eq!(err.context.as_deref(), Some("      <Button>"));
    }

    #[test]
    fn test_indent_error_before_any_codegen() {
        // The matrix would also fail codegen; parsing rejects the indent first.
        let err = parse_err("<Matrix>\n  <Box>\n  <Box>\n   <Button>\n");
        assert_eq!(err.code, ERR_INDENT);
    }

    #[test]
    fn test_depth_jump_is_rejected() {
        let err = parse_err("<Box>\n  <Box>\n      <Button>\n");
        assert_eq!(err.code, ERR_DEPTH);
    }

    #[test]
    fn test_widget_with_html_and_children_is_rejected() {
        let err = parse_err("<Box>\n  <p>hello</p>\n  <Button>\n");
        assert_eq!(err.code, ERR_HTML_MIX);

        let err = parse_err("<Box>\n  <Button>\n  <p>hello</p>\n");
        assert_eq!(err.code, ERR_HTML_MIX);
    }

    #[test]
    fn test_html_region_keeps_nested_lines() {
        let widgets = WidgetRegistry::default();
        let nodes = TemplateParser::new(&widgets, "v.js")
            .parse("<Box>\n  <ul>\n    <li>one</li>\n  </ul>\n<Box @next>\n")
            .unwrap();
        assert_eq!(nodes[0].html, vec!["<ul>", "  <li>one</li>", "</ul>"]);
        assert!(nodes[0].children.is_empty());
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_html_outside_widget_is_rejected() {
        assert_eq!(parse_err("<p>loose</p>\n").code, ERR_HTML_MIX);
    }

    #[test]
    fn test_block_definition_only_at_depth_zero() {
        let err = parse_err("<Box>\n  <*inner>\n");
        assert_eq!(err.code, ERR_BLOCK);
    }

    #[test]
    fn test_unknown_character_in_widget_line() {
        let err = parse_err("<Box @a ~>\n");
        assert_eq!(err.code, ERR_GRAMMAR);
    }

    #[test]
    fn test_syntax_lines() {
        let widgets = WidgetRegistry::default();
        let nodes = TemplateParser::new(&widgets, "v.js")
            .parse("if a > 1\n  <Box>\nelse\n  <Button>\nfor i to 3\n  <Box>\n")
            .unwrap();
        assert!(matches!(&nodes[0].kind, NodeKind::Syntax(SyntaxKind::If(c)) if c == "a > 1"));
        assert!(matches!(&nodes[1].kind, NodeKind::Syntax(SyntaxKind::Else)));
        assert!(matches!(&nodes[2].kind, NodeKind::Syntax(SyntaxKind::For(e)) if e == "i to 3"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CODEGEN
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_widget_compiles_to_constructor_call() {
        let js = compile("<Box @title .head [0:0:100%:40px] {a: 1} (css: 'x')>", None).unwrap();
        assert!(js.starts_with("(function(){"));
        assert!(js.contains(
            r#"const __w0 = new lx.Box({key:"title", css:["head"], geom:[0,0,"100%","40px"], data:{a: 1}, css: 'x'});"#
        ));
    }

    #[test]
    fn test_top_level_children_use_render_cache() {
        let js = compile("<Box>\n  <Button 'ok'>\n", None).unwrap();
        let begin = js.find("__w0.begin();").unwrap();
        let child = js.find(r#"new lx.Button({text:"ok"})"#).unwrap();
        let end = js.find("__w0.end();").unwrap();
        assert!(begin < child && child < end);
    }

    #[test]
    fn test_deeper_children_receive_parent() {
        let js = compile("<Box>\n  <Box>\n    <Button>\n", None).unwrap();
        assert!(js.contains("new lx.Button({parent:__w1})"));
    }

    #[test]
    fn test_output_capture() {
        let js = compile("<Box>\n  <Input @name>\n  <Input [f:email]>\n", Some("form")).unwrap();
        assert!(js.starts_with("const form = (function(){"));
        assert!(js.contains(r#"_out("name", __w1);"#));
        assert!(js.contains(r#"_out("email", __w2);"#));
        assert!(js.contains("return __out;"));
    }

    #[test]
    fn test_method_calls_in_order() {
        let js = compile("<Box #show() #align('center')>", None).unwrap();
        let show = js.find("__w0.show();").unwrap();
        let align = js.find("__w0.align('center');").unwrap();
        assert!(show < align);
    }

    #[test]
    fn test_matrix_item_render() {
        let js = compile("<Matrix [m:rows]>\n  <Box @row>\n", None).unwrap();
        assert!(js.contains(r#"matrix:"rows""#));
        assert!(js.contains("__w0.setItemRender((__item) => {"));
        assert!(js.contains("parent:__item"));
    }

    #[test]
    fn test_matrix_needs_exactly_one_child() {
        let err = compile("<Matrix>\n  <Box>\n  <Box>\n", None).unwrap_err();
        assert_eq!(err.code, ERR_MATRIX);
    }

    #[test]
    fn test_for_loops() {
        let js = compile("for i to n\n  <Box>\nfor j from 2 to 5\n  <Box>\n", None).unwrap();
        assert!(js.contains("for (let i = 0; i < n; i++) {"));
        assert!(js.contains("for (let j = 2; j <= 5; j++) {"));
    }

    #[test]
    fn test_if_chain() {
        let js = compile("if a\n  <Box>\nelseif b\n  <Box>\nelse\n  <Box>\n", None).unwrap();
        assert!(js.contains("if (a) {"));
        assert!(js.contains("else if (b) {"));
        assert!(js.contains("else {"));
    }

    #[test]
    fn test_else_without_if() {
        let err = compile("<Box>\nelse\n  <Box>\n", None).unwrap_err();
        assert_eq!(err.code, ERR_SYNTAX_ORDER);
    }

    #[test]
    fn test_blocks_emitted_first_and_linked() {
        let js = compile("<Box>\n  <&row>\n<*row>\n  <Button>\n", None).unwrap();
        let def = js.find("function __lxBlock_row(__parent) {").unwrap();
        let call = js.find("__lxBlock_row(null);").unwrap();
        assert!(def < call);
        assert!(js.contains("new lx.Button({parent:__parent})"));
    }

    #[test]
    fn test_link_to_unknown_block() {
        let err = compile("<Box>\n  <&missing>\n", None).unwrap_err();
        assert_eq!(err.code, ERR_BLOCK);
    }

    #[test]
    fn test_html_inside_syntax_node() {
        let js = compile("<Box>\n  if ok\n    <b>yes</b>\n", None).unwrap();
        assert!(js.contains(r#"lx.insertHtml("<b>yes</b>");"#));
    }

    #[test]
    fn test_widget_html_buffer() {
        let js = compile("<Box>\n  <i>x</i>\n", None).unwrap();
        assert!(js.contains(r#"html:"<i>x</i>""#));
    }

    #[test]
    fn test_custom_widget_tags() {
        let mut widgets = WidgetRegistry::empty();
        widgets.register("Card", "ui.Card");
        let nodes = TemplateParser::new(&widgets, "v.js").parse("<Card @c>").unwrap();
        let js = TemplateCompiler::new("v.js", None).compile(&nodes).unwrap();
        assert!(js.contains(r#"new ui.Card({key:"c"})"#));
    }
}
