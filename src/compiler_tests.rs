//! Directive compiler pipeline tests.

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::asset::AssetKind;
    use crate::compiler::{CompilerOptions, DirectiveCompiler};
    use crate::discovery::ModuleMap;
    use crate::error::LxError;
    use crate::unit::{CompileUnit, Context, DiagnosticKind};
    use crate::validate::ERR_BRACE;

    fn compile_unit(unit: &mut CompileUnit) -> String {
        let modules = ModuleMap::default();
        DirectiveCompiler::new(&modules).compile(unit).unwrap()
    }

    fn compile_code(code: &str, context: Context) -> (String, CompileUnit) {
        let mut unit = CompileUnit::from_code(code, context);
        let out = compile_unit(&mut unit);
        (out, unit)
    }

    #[test]
    fn test_context_filtering() {
        let code = "@lx:<context SERVER: const s = 1; @lx:context>\n@lx:<context CLIENT: const c = 2; @lx:context>";
        let (client, _) = compile_code(code, Context::Client);
        assert!(client.contains("const c = 2;"));
        assert!(!client.contains("const s"));

        let (server, _) = compile_code(code, Context::Server);
        assert!(server.contains("const s = 1;"));
        assert!(!server.contains("const c"));
    }

    #[test]
    fn test_mode_filtering() {
        let code = "@lx:<mode dev: debug(); @lx:mode>@lx:<mode prod: ship(); @lx:mode>";
        let mut unit = CompileUnit::from_code(code, Context::Client).with_mode("prod");
        let out = compile_unit(&mut unit);
        assert!(out.contains("ship();"));
        assert!(!out.contains("debug();"));
    }

    #[test]
    fn test_comments_and_escaped_directives_removed() {
        let code = "// @lx:use Missing;\nconst a = 1; // note\n/* block */const b = '// kept';";
        let (out, unit) = compile_code(code, Context::Client);
        assert!(!out.contains("Missing"));
        assert!(!out.contains("note"));
        assert!(!out.contains("block"));
        assert!(out.contains("'// kept'"));
        assert!(unit.diagnostics.is_empty());
    }

    #[test]
    fn test_module_directives_stripped() {
        let (out, _) = compile_code(
            "@lx:module Shop.Cart;\n@lx:module-data: widget = Cart;\nconst x = 1;",
            Context::Client,
        );
        assert!(!out.contains("@lx:module"));
        assert!(out.contains("const x = 1;"));
    }

    #[test]
    fn test_data_injection() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("d.json"), r#"{"a": [1, 2]}"#).unwrap();
        fs::write(dir.path().join("d.yaml"), "name: box\n").unwrap();
        let code = "const j = lx(json, 'd.json');\nconst y = lx(yaml, \"d.yaml\");";
        let mut unit = CompileUnit::from_code(code, Context::Server).with_base_dir(dir.path());
        let out = compile_unit(&mut unit);
        assert!(out.contains(r#"const j = {"a":[1,2]};"#));
        assert!(out.contains(r#"const y = {"name":"box"};"#));
    }

    #[test]
    fn test_unreadable_data_becomes_null() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{nope").unwrap();
        let code = "const a = lx(json, 'missing.json');\nconst b = lx(json, 'bad.json');\nconst c = 3;";
        let mut unit = CompileUnit::from_code(code, Context::Server).with_base_dir(dir.path());
        let out = compile_unit(&mut unit);
        assert!(out.contains("const a = null;"));
        assert!(out.contains("const b = null;"));
        assert!(out.contains("const c = 3;"));
        assert_eq!(
            unit.diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::Data)
                .count(),
            2
        );
    }

    #[test]
    fn test_asset_directives_collected() {
        let mut unit = CompileUnit::from_code(
            "@lx:js ./lib/a.js;\n@lx:css https://cdn.x/a.css;\n@lx:js ./lib/a.js;\nrun();",
            Context::Client,
        )
        .with_base_dir("/srv/app/src");
        let out = compile_unit(&mut unit);
        assert!(!out.contains("@lx:js") && !out.contains("@lx:css"));
        assert_eq!(unit.assets.of_kind(AssetKind::Js), vec!["/srv/app/src/lib/a.js"]);
        assert_eq!(unit.assets.of_kind(AssetKind::Css), vec!["https://cdn.x/a.css"]);
    }

    #[test]
    fn test_i18n_substitution_by_language() {
        let code = "const g = lx(i18n).greet;";
        let mut unit = CompileUnit::from_code(code, Context::Client).with_language("en");
        unit.module_i18n.insert("en", "greet", "Hi");
        assert!(compile_unit(&mut unit).contains(r#"const g = "Hi";"#));

        let mut unit = CompileUnit::from_code(code, Context::Client).with_language("fr");
        unit.module_i18n.insert("en", "greet", "Hi");
        assert!(compile_unit(&mut unit).contains(r#"const g = "greet";"#));
    }

    #[test]
    fn test_self_reference() {
        let (out, _) = compile_code("const t = lx.self(title);", Context::Server);
        assert!(out.contains("const t = Plugin.title;"));
    }

    #[test]
    fn test_embedded_template_block() {
        let code = "@lx:<ml:form:\n<Box>\n  <Input @name>\n@lx:ml>\nform.name.focus();";
        let (out, unit) = compile_code(code, Context::Client);
        assert!(out.contains("const form = (function(){"));
        assert!(out.contains(r#"_out("name", __w1);"#));
        assert!(out.contains("form.name.focus();"));
        assert!(unit.diagnostics.is_empty());
    }

    #[test]
    fn test_broken_template_is_isolated() {
        let code = "before();\n@lx:<ml:\n<Box>\n   <Button>\n  <Button>\n@lx:ml>\nafter();";
        let (out, unit) = compile_code(code, Context::Client);
        assert!(out.contains("before();"));
        assert!(out.contains("after();"));
        assert!(!out.contains("new lx.Box"));
        assert!(unit.has_diagnostic(DiagnosticKind::Structural));
    }

    #[test]
    fn test_class_sugar_in_pipeline() {
        let code = "@lx:namespace ui;\nclass Button extends ui.Box {\n    @lx:const SIZE = 10;\n}\n@lx:const LIMIT = 5;";
        let (out, _) = compile_code(code, Context::Client);
        assert!(out.contains("lx.createNamespace('ui')"));
        assert!(out.contains("if(__ns__.Button!==undefined)return;"));
        assert!(out.contains("static get SIZE() { return 10; }"));
        assert!(out.contains("const LIMIT = 5;"));
        assert!(out.contains("Button.__afterDefinition();"));
    }

    #[test]
    fn test_malformed_class_header_is_reported() {
        let (out, unit) = compile_code("class extends Base {\n}\nok();", Context::Client);
        assert!(out.contains("class extends Base {"));
        assert!(out.contains("ok();"));
        assert!(unit.has_diagnostic(DiagnosticKind::Structural));
    }

    #[test]
    fn test_unbalanced_class_aborts() {
        let modules = ModuleMap::default();
        let mut unit = CompileUnit::from_code("class Broken {\n  m() {\n", Context::Client);
        let err = DirectiveCompiler::new(&modules).compile(&mut unit).unwrap_err();
        match err {
            LxError::Structural(e) => assert_eq!(e.code, ERR_BRACE),
            other => panic!("expected structural error, got {:?}", other),
        }
    }

    #[test]
    fn test_requested_modules_become_headers() {
        let mut unit = CompileUnit::from_code("run();", Context::Client);
        unit.use_modules = vec!["Nowhere".to_string()];
        let out = compile_unit(&mut unit);
        assert!(out.contains("run();"));
        assert!(unit.has_diagnostic(DiagnosticKind::Resolution));
        assert!(unit.use_modules.is_empty());
    }

    #[test]
    fn test_prev_and_post_code_surround_source() {
        let mut unit = CompileUnit::from_code("body();", Context::Client);
        unit.prev_code = "head();".to_string();
        unit.post_code = "tail();".to_string();
        let out = compile_unit(&mut unit);
        let head = out.find("head();").unwrap();
        let body = out.find("body();").unwrap();
        let tail = out.find("tail();").unwrap();
        assert!(head < body && body < tail);
    }

    #[test]
    fn test_wrap_in_isolating_closure() {
        let mut unit = CompileUnit::from_code("let a = 1;", Context::Client);
        unit.wrap = true;
        let out = compile_unit(&mut unit);
        assert!(out.starts_with("(function(){\n"));
        assert!(out.trim_end().ends_with("})();"));
    }

    #[test]
    fn test_syntax_check_reports_but_returns_output() {
        let modules = ModuleMap::default();
        let compiler = DirectiveCompiler::new(&modules).with_options(CompilerOptions {
            check_syntax: true,
            ..Default::default()
        });
        let mut unit = CompileUnit::from_code("const = ;", Context::Client);
        let out = compiler.compile(&mut unit).unwrap();
        assert!(out.contains("const = ;"));
        assert!(unit.has_diagnostic(DiagnosticKind::Syntax));

        let mut unit = CompileUnit::from_code("return 1;", Context::Server);
        compiler.compile(&mut unit).unwrap();
        assert!(!unit.has_diagnostic(DiagnosticKind::Syntax));
    }

    #[test]
    fn test_file_unit_reads_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.js");
        fs::write(&file, "@lx:<context CLIENT: main(); @lx:context>").unwrap();
        let mut unit = CompileUnit::from_file(&file, Context::Client);
        let out = compile_unit(&mut unit);
        assert!(out.contains("main();"));
        assert_eq!(unit.compiled_files.len(), 1);
        assert!(unit.compiled_files[0].ends_with("main.js"));
    }
}
