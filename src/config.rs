use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "prescript.toml";

/// Complete Prescript configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrescriptConfig {
    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub compile: CompileConfig,

    #[serde(default)]
    pub apply: ApplyConfig,
}

/// Build output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build-output root; compiled scripts and adapters live below it
    #[serde(default = "default_build_dir")]
    pub dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dir: default_build_dir(),
        }
    }
}

/// Script source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Directory searched recursively for scripts
    #[serde(default = "default_scripts_dir")]
    pub dir: String,

    /// Script file extension, without the leading dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_scripts_dir(),
            extension: default_extension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompileConfig {
    /// Compile worker threads (0 = one per CPU)
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplyConfig {
    /// Plugin ids the default plugin manager accepts (empty = any)
    #[serde(default)]
    pub known_plugins: Vec<String>,
}

fn default_build_dir() -> String {
    "build".to_string()
}

fn default_scripts_dir() -> String {
    "src/main/prescript".to_string()
}

fn default_extension() -> String {
    "pscript".to_string()
}

impl PrescriptConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: PrescriptConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.build.dir.is_empty() {
            anyhow::bail!("build.dir must be set");
        }

        if self.scripts.dir.is_empty() {
            anyhow::bail!("scripts.dir must be set");
        }

        let extension = &self.scripts.extension;
        if extension.is_empty() || extension.starts_with('.') || extension.contains('/') {
            anyhow::bail!(
                "scripts.extension must be a bare extension without dots or slashes: {}",
                extension
            );
        }

        if let Some(id) = self.apply.known_plugins.iter().find(|id| id.trim().is_empty()) {
            anyhow::bail!("apply.known_plugins must not contain empty ids: {:?}", id);
        }

        Ok(())
    }
}

/// Discovers Prescript configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/prescript/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up directory tree from cwd.
///
/// Returns Ok(None) if no config is found (neither explicit nor discovered).
pub fn load_config_with_discovery(explicit_path: Option<&str>) -> Result<Option<PrescriptConfig>> {
    if let Some(config_path) = explicit_path {
        return Ok(Some(PrescriptConfig::from_file(config_path)?));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    match discover_config(&current_dir)? {
        Some(discovered_path) => {
            tracing::debug!("Using config: {}", discovered_path.display());
            Ok(Some(PrescriptConfig::from_file(&discovered_path)?))
        }
        None => Ok(None),
    }
}
