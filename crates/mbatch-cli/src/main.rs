mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "mbatch",
    version,
    about = "Incremental batch-effect analysis over a converted data tree"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Process new and changed batches and update the index
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Validate configuration and report what a run would dispatch
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Rebuild the index from the archived results tree
    Reindex {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline } => commands::run::execute(&pipeline).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
        Commands::Reindex { pipeline } => commands::reindex::execute(&pipeline).await,
    }
}
