// Library interface for Prescript
// This allows integration tests and external code to drive the pipeline

pub mod adapter;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod logging;
pub mod merger;
pub mod pipeline;
pub mod runtime;
pub mod scope;
pub mod script;

// Re-export commonly used types
pub use adapter::{AdapterApplyFailure, AdapterDescriptor, AdapterGenerator, AdapterRegistry};
pub use compiler::{CompiledUnit, DslCompiler, Phase, ScriptCompiler, TargetKind};
pub use pipeline::{open_output, BatchReport, BuildLayout, PipelineError, Precompiler};
pub use runtime::{BuildTarget, RunError, ScriptRunner, ScriptTarget};
pub use scope::{ScopeError, ScopeHandle};
pub use script::{discover_scripts, CompileCache, ScriptDescriptor};
