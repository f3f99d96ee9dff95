/// `prescript cache` command implementation
///
/// Inspects and cleans the compiled-scripts cache (list, stats, clean).
use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::prescript_prefix;
use crate::compiler::DslCompiler;
use crate::config::load_config_with_discovery;
use crate::pipeline::BuildLayout;
use crate::script::CompileCache;

pub fn run(args: CacheArgs) -> Result<()> {
    let file_config = load_config_with_discovery(args.common.config.as_deref())?;
    let build_dir = args
        .common
        .build_dir
        .clone()
        .unwrap_or_else(|| file_config.unwrap_or_default().build.dir);
    let layout = BuildLayout::new(build_dir);

    let cache = CompileCache::new(
        layout.compiled_classes_dir(),
        layout.compiled_metadata_dir(),
        Arc::new(DslCompiler::new()),
    )
    .context("Failed to open compile cache")?;

    match args.command {
        CacheCommands::List { verbose } => list(&cache, verbose),
        CacheCommands::Stats => stats(&cache),
        CacheCommands::Clean { class_name, all } => clean(&cache, class_name.as_deref(), all),
    }
}

/// List all cached script phases
fn list(cache: &CompileCache, verbose: bool) -> Result<()> {
    let entries = cache.list().context("Failed to list cache entries")?;

    if entries.is_empty() {
        println!("No cached scripts.");
        return Ok(());
    }

    println!("Cached script phases ({} entries):", entries.len());
    println!();

    for entry in entries {
        let metadata = &entry.metadata;
        println!("  {}", entry.class_name);
        println!(
            "    Phase: {} ({} script)",
            metadata.phase, metadata.target_kind
        );
        println!(
            "    Created: {}",
            metadata.created_at.format("%Y-%m-%d %H:%M:%S")
        );

        if verbose {
            println!("    Content hash: {}", metadata.content_hash);
            println!("    Does something: {}", metadata.run_does_something);
            println!("    Classes: {}", entry.classes_dir.display());
            println!("    Metadata: {}", entry.metadata_dir.display());
        }

        println!();
    }

    Ok(())
}

/// Show cache statistics
fn stats(cache: &CompileCache) -> Result<()> {
    let stats = cache.stats().context("Failed to get cache statistics")?;

    println!("Compile Cache Statistics");
    println!();
    println!("Total entries: {}", stats.total_entries);
    println!("No-op entries: {}", stats.noop_entries);
    println!("Corrupt entries: {}", stats.corrupt_entries);
    println!(
        "Total size: {:.2} KB",
        stats.total_size_bytes as f64 / 1_000.0
    );

    Ok(())
}

/// Clean one class or the whole cache
fn clean(cache: &CompileCache, class_name: Option<&str>, all: bool) -> Result<()> {
    if all {
        cache.clean_all().context("Failed to clean compile cache")?;
        println!("{} All cached script phases cleaned.", prescript_prefix());
        return Ok(());
    }

    let Some(class_name) = class_name else {
        anyhow::bail!("Specify --all to clean the whole cache, or provide a class name");
    };

    cache
        .remove(class_name)
        .with_context(|| format!("Failed to clean cache for {}", class_name))?;
    println!("{} Cache cleaned for: {}", prescript_prefix(), class_name);

    Ok(())
}
