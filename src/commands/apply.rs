/// `prescript apply` command implementation
///
/// Applies one compiled script to a fresh in-process target. The target's
/// console output goes to stdout, applied plugins to stderr.
use anyhow::{anyhow, Context, Result};

use crate::adapter::AdapterRegistry;
use crate::cli::ApplyArgs;
use crate::cli_utils::prescript_prefix;
use crate::config::load_config_with_discovery;
use crate::merger::MergedApplyConfig;
use crate::pipeline::{open_output, BuildLayout, ROOT_SCOPE_NAME};
use crate::runtime::BuildTarget;
use crate::scope::ScopeHandle;

pub fn run(args: ApplyArgs) -> Result<()> {
    let file_config = load_config_with_discovery(args.common.config.as_deref())?;
    let config = MergedApplyConfig::merge(&args, file_config);
    let layout = BuildLayout::new(&config.build_dir);

    let registry = AdapterRegistry::load_from_dir(&layout.adapters_dir())
        .context("Failed to load script adapters")?;
    let adapter = registry.get(&args.script_id).ok_or_else(|| {
        anyhow!(
            "No compiled script with id '{}' in {}. Run `prescript compile` first.",
            args.script_id,
            config.build_dir.display()
        )
    })?;

    let root = ScopeHandle::root(ROOT_SCOPE_NAME);
    let plugins = open_output(&layout, &root).context("Failed to load compiled scripts")?;
    let scope = plugins.create_child(&config.target_name)?;
    let mut target = BuildTarget::new(adapter.target_kind, &config.target_name, scope)
        .with_known_plugins(config.known_plugins.iter().cloned());

    let result = adapter.apply(&mut target);

    // Partial effects are reported even when the script fails
    for line in target.journal().console_lines() {
        println!("{}", line);
    }
    for plugin in target.journal().applied_plugins() {
        eprintln!("{} Applied plugin: {}", prescript_prefix(), plugin);
    }

    result?;
    Ok(())
}
