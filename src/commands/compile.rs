/// `prescript compile` command implementation
///
/// Discovers scripts, compiles them in one batch and writes their adapters.
use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::CompileArgs;
use crate::cli_utils::{prescript_prefix, status_mark};
use crate::compiler::DslCompiler;
use crate::config::load_config_with_discovery;
use crate::merger::MergedCompileConfig;
use crate::pipeline::{BuildLayout, Precompiler, ROOT_SCOPE_NAME};
use crate::scope::ScopeHandle;
use crate::script::discover_scripts;

pub fn run(args: CompileArgs) -> Result<()> {
    let file_config = load_config_with_discovery(args.common.config.as_deref())?;
    let config = MergedCompileConfig::merge(&args, file_config);

    let scripts = discover_scripts(&config.scripts_dir, &config.extension)?;
    if scripts.is_empty() {
        println!(
            "{} No *.{} scripts found in {}",
            prescript_prefix(),
            config.extension,
            config.scripts_dir.display()
        );
        return Ok(());
    }

    let precompiler = Precompiler::new(
        BuildLayout::new(&config.build_dir),
        Arc::new(DslCompiler::new()),
    )
    .context("Failed to initialize compile cache")?
    .with_workers(config.workers);

    let root = ScopeHandle::root(ROOT_SCOPE_NAME);
    let report = precompiler
        .compile_scripts(&root, &scripts)
        .context("Failed to compile scripts")?;

    println!(
        "{} Compiled {} scripts into {}",
        prescript_prefix(),
        scripts.len(),
        config.build_dir.display()
    );
    for script in &report.scripts {
        match &script.result {
            Ok(outcome) => {
                let state = if outcome.recompiled.is_empty() {
                    "up-to-date"
                } else {
                    "compiled"
                };
                println!(
                    "  {} {} -> {} ({})",
                    status_mark(true),
                    script.script_id,
                    outcome.adapter.adapter_class,
                    state
                );
            }
            Err(e) => println!("  {} {}: {}", status_mark(false), script.script_id, e),
        }
    }

    let failed = report.failures().count();
    report.scope.release()?;
    if failed > 0 {
        anyhow::bail!("{} of {} scripts failed to compile", failed, scripts.len());
    }

    Ok(())
}
