//! # lx directive compiler
//!
//! Source-to-source compiler and server-side renderer for the lx authoring
//! language, a JavaScript superset driven by `@lx:` directives.
//!
//! ## Pipeline
//!
//! 1. **Directive compiler** ([`DirectiveCompiler`]): strips escapes, expands
//!    embedded template blocks, filters context and mode branches, injects
//!    data, rewrites class sugar, collects assets, expands `require`/`use`
//!    and substitutes translations.
//! 2. **Template DSL** ([`TemplateParser`], [`TemplateCompiler`]): the
//!    indentation based widget tree compiled to script.
//! 3. **Dependency resolver** ([`DependencyResolver`]): orders required files
//!    by class inheritance and modules by their `use` graph.
//! 4. **Execution sandbox** ([`Sandbox`]): runs compiled script in a fresh
//!    interpreter and captures an [`ExecutionResult`].
//! 5. **Renderer** ([`Renderer`]): composes plugins and snippets into a page
//!    body and a [`RuntimePayload`].
//! 6. **Asset linker** ([`AssetLinker`]): maps file paths to public URLs.
//!
//! ## Error policy
//!
//! Failures attributable to one file, module or snippet are logged and
//! recorded as [`Diagnostic`]s; the rest of the request completes. Only
//! infrastructure failures abort through [`LxError`].

pub mod asset;
pub mod build;
pub mod cache;
pub mod class_sugar;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod discovery;
pub mod error;
pub mod finalize;
pub mod fragment;
pub mod i18n;
pub mod linker;
pub mod logging;
pub mod parse;
pub mod plugin;
pub mod renderer;
pub mod resolver;
pub mod sandbox;
pub mod scan;
pub mod unit;
pub mod validate;

#[cfg(test)]
mod compiler_tests;
#[cfg(test)]
mod sandbox_tests;
#[cfg(test)]
mod template_tests;

pub use asset::{Asset, AssetKind, AssetSet};
pub use build::{build_targets, BuildReport};
pub use cache::CacheType;
pub use codegen::TemplateCompiler;
pub use compiler::{CompilerOptions, DirectiveCompiler};
pub use config::{BuildTarget, LxConfig, TargetType};
pub use discovery::{ModuleDescriptor, ModuleMap, PluginMap};
pub use error::{LxError, Result};
pub use finalize::{LinkedAssets, RuntimePayload, SnippetPayload};
pub use i18n::I18nTable;
pub use linker::AssetLinker;
pub use parse::{Node, NodeKind, TemplateParser, WidgetRegistry};
pub use plugin::{PluginConfig, PluginDescriptor, PluginHooks, PluginInstance, PluginRegistry};
pub use renderer::{RenderOutput, Renderer, SnippetInstance};
pub use resolver::{DependencyEntry, DependencyResolver, DuplicateClassPolicy};
pub use sandbox::{ExecutionResult, Sandbox};
pub use unit::{CompileFlags, CompileUnit, Context, Diagnostic, DiagnosticKind};
pub use validate::CompilerError;
