use clap::{Parser, Subcommand};

/// Prescript - Precompiled two-phase script plugins
///
/// Prescript compiles configuration scripts into cached units plus one small
/// adapter per script, and applies those adapters to targets later.
#[derive(Parser, Debug)]
#[command(name = "prescript")]
#[command(author = "Prescript Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Precompiled two-phase script plugins", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Common configuration arguments shared across commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "PRESCRIPT_CONFIG")]
    pub config: Option<String>,

    /// Build-output root
    #[arg(long, env = "PRESCRIPT_BUILD_DIR")]
    pub build_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile every script into the build output
    Compile(CompileArgs),

    /// Apply a compiled script to a fresh target
    Apply(ApplyArgs),

    /// Inspect and clean the compiled-scripts cache
    Cache(CacheArgs),
}

#[derive(Parser, Debug, Clone, Default)]
pub struct CompileArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Directory searched recursively for scripts
    #[arg(long, env = "PRESCRIPT_SCRIPTS_DIR")]
    pub scripts_dir: Option<String>,

    /// Script file extension, without the leading dot
    #[arg(long, env = "PRESCRIPT_EXTENSION")]
    pub extension: Option<String>,

    /// Compile worker threads (0 = one per CPU)
    #[arg(long, env = "PRESCRIPT_WORKERS")]
    pub workers: Option<usize>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct ApplyArgs {
    /// Id of the script to apply
    pub script_id: String,

    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Display name of the target (defaults to the script id)
    #[arg(long)]
    pub target_name: Option<String>,

    /// Plugin ids the target accepts, comma-separated (default: any)
    #[arg(long = "known-plugin", env = "PRESCRIPT_KNOWN_PLUGINS", value_delimiter = ',')]
    pub known_plugins: Option<Vec<String>>,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List all cached script phases
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show cache statistics
    Stats,

    /// Clean cache for one class
    Clean {
        /// Class name (omit to clean all)
        class_name: Option<String>,

        /// Clean all cached phases
        #[arg(long)]
        all: bool,
    },
}
