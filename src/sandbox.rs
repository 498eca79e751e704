//! Execution sandbox.
//!
//! Every call builds a fresh interpreter, evaluates runtime core, app
//! bootstrap and the caller script (in that order) inside one isolating
//! function, and returns the captured logs, dumps, return value or fatal
//! trace as an [`ExecutionResult`].

use boa_engine::{Context, Source};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{LxError, Result};
use crate::scan::js_string;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub log: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub dumps: Vec<serde_json::Value>,
    #[serde(default, rename = "result")]
    pub return_value: serde_json::Value,
    #[serde(default)]
    pub fatal: Option<String>,
}

impl ExecutionResult {
    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

const WRAPPER_HEAD: &str = r#"(function () {
  const __log = {};
  const __errors = {};
  const __dumps = [];
  const __safe = (v) => {
    if (v === undefined) return null;
    try { return JSON.parse(JSON.stringify(v)); } catch (e) { return String(v); }
  };
  const __push = (target, msg, category) => {
    const key = category === undefined || category === null ? 'default' : String(category);
    (target[key] = target[key] || []).push(__safe(msg));
  };
  const Sandbox = {
    log: (msg, category) => __push(__log, msg, category),
    error: (msg, category) => __push(__errors, msg, category),
    dump: (value) => { __dumps.push(__safe(value)); },
  };
  const __join = (args) => args.map((a) => typeof a === 'string' ? a : JSON.stringify(a)).join(' ');
  const console = {
    log: (...a) => Sandbox.log(__join(a)),
    info: (...a) => Sandbox.log(__join(a)),
    debug: (...a) => Sandbox.log(__join(a), 'debug'),
    warn: (...a) => Sandbox.error(__join(a), 'warning'),
    error: (...a) => Sandbox.error(__join(a)),
  };
  let __result = null;
  let __fatal = null;
  try {
    const __body = new Function('Sandbox', 'console', "#;

const WRAPPER_TAIL: &str = r#");
    __result = __safe(__body(Sandbox, console));
  } catch (e) {
    let trace = String(e);
    if (e && e.stack) trace += '\n' + e.stack;
    __fatal = trace;
    __result = null;
  }
  return JSON.stringify({ log: __log, errors: __errors, dumps: __dumps, result: __result, fatal: __fatal });
})();"#;

#[derive(Debug, Clone)]
pub struct Sandbox {
    core_path: PathBuf,
    bootstrap_path: Option<PathBuf>,
}

impl Sandbox {
    pub fn new(core_path: impl Into<PathBuf>) -> Self {
        Self {
            core_path: core_path.into(),
            bootstrap_path: None,
        }
    }

    pub fn with_bootstrap(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap_path = Some(path.into());
        self
    }

    pub fn execute(&self, script: &str) -> Result<ExecutionResult> {
        self.execute_with_seed(script, &serde_json::Map::new())
    }

    /// Run `script` with each seed entry declared as a `const` beforehand.
    pub fn execute_with_seed(
        &self,
        script: &str,
        seed: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ExecutionResult> {
        let (core, (bootstrap, script)) = rayon::join(
            || load_core(&self.core_path),
            || {
                rayon::join(
                    || load_bootstrap(self.bootstrap_path.as_deref()),
                    || prepare_script(script, seed),
                )
            },
        );
        let body = [core?, bootstrap?, script?].join("\n");
        let program = format!("{}{}{}", WRAPPER_HEAD, js_string(&body), WRAPPER_TAIL);

        let mut context = Context::default();
        let value = context
            .eval(Source::from_bytes(program.as_bytes()))
            .map_err(|e| LxError::Infrastructure(format!("interpreter failure: {}", e)))?;
        let transport = value
            .as_string()
            .ok_or_else(|| LxError::Infrastructure("sandbox result is not a string".to_string()))?
            .to_std_string_escaped();

        let result: ExecutionResult = serde_json::from_str(&transport)
            .map_err(|e| LxError::Infrastructure(format!("malformed sandbox result: {}", e)))?;
        if let Some(fatal) = &result.fatal {
            tracing::warn!("[lx:sandbox] Script failed: {}", fatal.lines().next().unwrap_or(""));
        }
        Ok(result)
    }
}

fn load_core(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        LxError::Infrastructure(format!("runtime core {:?} unreadable: {}", path, e))
    })
}

fn load_bootstrap(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).map_err(|e| {
            LxError::Infrastructure(format!("app bootstrap {:?} unreadable: {}", p, e))
        }),
        None => Ok(String::new()),
    }
}

fn prepare_script(script: &str, seed: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
    let mut out = String::new();
    for (name, value) in seed {
        out.push_str(&format!("const {} = {};\n", name, serde_json::to_string(value)?));
    }
    out.push_str(script);
    Ok(out)
}
