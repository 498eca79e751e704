//! Execution sandbox tests against a real interpreter.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    use crate::error::LxError;
    use crate::sandbox::Sandbox;

    fn sandbox_in(dir: &Path) -> Sandbox {
        let core = dir.join("core.js");
        fs::write(&core, "var lx = {version: 1};\n").unwrap();
        Sandbox::new(core)
    }

    #[test]
    fn test_return_value_sees_runtime_core() {
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox_in(dir.path())
            .execute("return {v: lx.version, list: [1, 'a']};")
            .unwrap();
        assert!(!result.is_fatal());
        assert_eq!(result.return_value, json!({"v": 1, "list": [1, "a"]}));
    }

    #[test]
    fn test_no_return_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox_in(dir.path()).execute("let a = 1;").unwrap();
        assert_eq!(result.return_value, serde_json::Value::Null);
        assert!(result.fatal.is_none());
    }

    #[test]
    fn test_logs_grouped_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let script = "Sandbox.log('a');\nSandbox.log('b', 'net');\nSandbox.log({n: 2}, 'net');\n\
                      Sandbox.error('bad');\nconsole.log('x', 1);\nSandbox.dump([1, 2]);";
        let result = sandbox_in(dir.path()).execute(script).unwrap();
        assert_eq!(result.log["default"], vec![json!("a"), json!("x 1")]);
        assert_eq!(result.log["net"], vec![json!("b"), json!({"n": 2})]);
        assert_eq!(result.errors["default"], vec![json!("bad")]);
        assert_eq!(result.dumps, vec![json!([1, 2])]);
    }

    #[test]
    fn test_thrown_error_is_fatal_and_keeps_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = "Sandbox.log('before');\nSandbox.dump(7);\nthrow new Error('boom');";
        let result = sandbox_in(dir.path()).execute(script).unwrap();
        assert!(result.is_fatal());
        assert!(result.fatal.as_deref().unwrap().contains("boom"));
        assert_eq!(result.return_value, serde_json::Value::Null);
        assert_eq!(result.log["default"], vec![json!("before")]);
        assert_eq!(result.dumps, vec![json!(7)]);
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox_in(dir.path()).execute("const = ;").unwrap();
        assert!(result.is_fatal());
        assert_eq!(result.return_value, serde_json::Value::Null);
    }

    #[test]
    fn test_seed_values_visible() {
        let dir = tempfile::tempdir().unwrap();
        let mut seed = serde_json::Map::new();
        seed.insert("Plugin".to_string(), json!({"name": "shop", "params": {"n": 3}}));
        let result = sandbox_in(dir.path())
            .execute_with_seed("return Plugin.name + ':' + Plugin.params.n;", &seed)
            .unwrap();
        assert_eq!(result.return_value, json!("shop:3"));
    }

    #[test]
    fn test_no_state_survives_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        sandbox.execute("globalThis.leak = 42;").unwrap();
        let result = sandbox.execute("return typeof globalThis.leak;").unwrap();
        assert_eq!(result.return_value, json!("undefined"));
    }

    #[test]
    fn test_bootstrap_runs_after_core() {
        let dir = tempfile::tempdir().unwrap();
        let boot = dir.path().join("boot.js");
        fs::write(&boot, "lx.app = 'v' + lx.version;\n").unwrap();
        let result = sandbox_in(dir.path())
            .with_bootstrap(&boot)
            .execute("return lx.app;")
            .unwrap();
        assert_eq!(result.return_value, json!("v1"));
    }

    #[test]
    fn test_missing_core_is_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Sandbox::new(dir.path().join("nope.js"))
            .execute("return 1;")
            .unwrap_err();
        assert!(matches!(err, LxError::Infrastructure(_)));
    }

    #[test]
    fn test_script_text_with_quotes_and_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let script = "const s = \"a\\\"b\";\nconst t = `line1\nline2`;\nreturn s + '|' + t;";
        let result = sandbox_in(dir.path()).execute(script).unwrap();
        assert_eq!(result.return_value, json!("a\"b|line1\nline2"));
    }
}
