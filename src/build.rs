//! Per-target build driver.

use std::fs;

use crate::compiler::DirectiveCompiler;
use crate::config::{BuildTarget, LxConfig, TargetType};
use crate::discovery::ModuleMap;
use crate::error::{LxError, Result};
use crate::unit::{CompileUnit, Context, Diagnostic};

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub target: BuildTarget,
    pub bytes: usize,
    pub compiled_modules: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the target failed to compile; no output was written.
    pub error: Option<String>,
}

impl BuildReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub fn unit_for_target(target: &BuildTarget, config: &LxConfig) -> CompileUnit {
    let context = match target.target_type {
        TargetType::Server => Context::Server,
        TargetType::App | TargetType::Script => Context::Client,
    };
    let mut unit = CompileUnit::from_file(&target.entry_point, context)
        .with_language(&config.language)
        .with_mode(&config.mode);
    if target.target_type == TargetType::App {
        unit.is_app = true;
        unit.wrap = true;
    }
    unit
}

/// Compile every configured target and write its output file.
///
/// A target that fails to compile is reported and skipped; only output and
/// sandbox infrastructure failures abort the build.
pub fn build_targets(config: &LxConfig, modules: &ModuleMap) -> Result<Vec<BuildReport>> {
    let compiler = DirectiveCompiler::new(modules)
        .with_options(config.compiler_options())
        .with_widgets(config.widget_registry(modules));

    let mut reports = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        let mut unit = unit_for_target(target, config);
        let code = match compiler.compile(&mut unit) {
            Ok(code) => code,
            Err(e @ LxError::Infrastructure(_)) => return Err(e),
            Err(e) => {
                tracing::error!("[lx:build] {:?} failed: {}", target.entry_point, e);
                reports.push(BuildReport {
                    target: target.clone(),
                    bytes: 0,
                    compiled_modules: unit.compiled_modules,
                    diagnostics: unit.diagnostics,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };
        if let Some(dir) = target.output.parent() {
            fs::create_dir_all(dir).map_err(|e| LxError::io(dir, e))?;
        }
        fs::write(&target.output, &code).map_err(|e| LxError::io(&target.output, e))?;
        tracing::info!(
            "[lx:build] {:?} -> {:?} ({} bytes, {} diagnostics)",
            target.entry_point,
            target.output,
            code.len(),
            unit.diagnostics.len()
        );
        reports.push(BuildReport {
            target: target.clone(),
            bytes: code.len(),
            compiled_modules: unit.compiled_modules,
            diagnostics: unit.diagnostics,
            error: None,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const PROJECT: &str = r#"
runtimeCore: core.js
mapsDir: maps
publicRoot: /web
internalRoot: web
widgets:
  Card: ui.Card
targets:
  - entryPoint: src/app.js
    output: out/nested/app.js
    type: app
  - entryPoint: src/missing.js
    output: out/missing.js
    type: script
  - entryPoint: src/server.js
    output: out/server.js
    type: server
"#;

    fn project(dir: &Path) -> LxConfig {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("src/app.js"),
            "@lx:<context CLIENT: start(); @lx:context>\n\
             @lx:<context SERVER: secret(); @lx:context>\n\
             const w = @lx:<ml:\n<Card @c>\n@lx:ml>;\n",
        )
        .unwrap();
        fs::write(dir.join("src/server.js"), "@lx:<context SERVER: serve(); @lx:context>\n").unwrap();
        let file = dir.join("lx.yaml");
        fs::write(&file, PROJECT).unwrap();
        LxConfig::load(&file).unwrap()
    }

    #[test]
    fn test_app_target_wrapped_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        let reports = build_targets(&config, &ModuleMap::new(dir.path())).unwrap();

        assert!(reports[0].is_ok());
        let app = fs::read_to_string(dir.path().join("out/nested/app.js")).unwrap();
        assert_eq!(reports[0].bytes, app.len());
        assert!(app.contains("(function(){"));
        assert!(app.contains("start();"));
        assert!(!app.contains("secret();"));
        assert!(app.contains("new ui.Card("), "{}", app);
    }

    #[test]
    fn test_failing_target_does_not_stop_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path());
        let reports = build_targets(&config, &ModuleMap::new(dir.path())).unwrap();

        assert_eq!(reports.len(), 3);
        assert!(!reports[1].is_ok());
        assert!(reports[1].error.as_deref().unwrap().contains("missing.js"));
        assert!(!dir.path().join("out/missing.js").exists());

        assert!(reports[2].is_ok());
        let server = fs::read_to_string(dir.path().join("out/server.js")).unwrap();
        assert!(server.contains("serve();"));
        assert!(!server.contains("(function(){"));
    }
}
