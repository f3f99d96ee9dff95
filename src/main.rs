use anyhow::Result;
use clap::Parser;

use prescript::cli::{Cli, Commands};
use prescript::{commands, logging};

fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Compile(args) => commands::compile::run(args),
        Commands::Apply(args) => commands::apply::run(args),
        Commands::Cache(args) => commands::cache::run(args),
    }
}
