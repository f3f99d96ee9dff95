/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// This module handles merging configuration from multiple sources:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables
/// 3. Configuration file
/// 4. Built-in defaults (lowest priority)
use std::path::PathBuf;

use crate::cli::{ApplyArgs, CompileArgs, CommonConfigArgs};
use crate::config::PrescriptConfig;

/// Merged configuration for the compile command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedCompileConfig {
    pub build_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub extension: String,
    /// 0 = one per CPU
    pub workers: usize,
}

/// Merged configuration for the apply command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedApplyConfig {
    pub build_dir: PathBuf,
    pub target_name: String,
    pub known_plugins: Vec<String>,
}

fn build_dir(common: &CommonConfigArgs, file: &PrescriptConfig) -> PathBuf {
    PathBuf::from(
        common
            .build_dir
            .clone()
            .unwrap_or_else(|| file.build.dir.clone()),
    )
}

impl MergedCompileConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &CompileArgs, file_config: Option<PrescriptConfig>) -> Self {
        let file = file_config.unwrap_or_default();

        Self {
            build_dir: build_dir(&args.common, &file),
            scripts_dir: PathBuf::from(
                args.scripts_dir
                    .clone()
                    .unwrap_or_else(|| file.scripts.dir.clone()),
            ),
            extension: args
                .extension
                .clone()
                .unwrap_or_else(|| file.scripts.extension.clone()),
            workers: args.workers.unwrap_or(file.compile.workers),
        }
    }
}

impl MergedApplyConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &ApplyArgs, file_config: Option<PrescriptConfig>) -> Self {
        let file = file_config.unwrap_or_default();

        Self {
            build_dir: build_dir(&args.common, &file),
            target_name: args
                .target_name
                .clone()
                .unwrap_or_else(|| args.script_id.clone()),
            known_plugins: args
                .known_plugins
                .clone()
                .unwrap_or_else(|| file.apply.known_plugins.clone()),
        }
    }
}
