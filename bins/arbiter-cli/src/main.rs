mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Judge submissions locally and inspect engine configuration", long_about = None)]
struct Cli {
    /// Engine config (defaults to $ARBITER_CONFIG, then config/arbiter.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a submission JSON file against the local Docker daemon
    Judge {
        /// Path to the submission (source_code, test_cases, points_available)
        #[arg(short, long)]
        submission: PathBuf,

        /// Override the submission's language hint
        #[arg(short, long)]
        language: Option<String>,

        /// Print the audit trail after the report
        #[arg(long, default_value = "false")]
        audit: bool,
    },

    /// Detect the language of a source file
    Classify {
        /// Source file to classify
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List configured languages and their limits
    Languages,

    /// Validate the engine configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::init_tracing();

    match cli.command {
        Commands::Judge {
            submission,
            language,
            audit,
        } => {
            commands::judge(cli.config.as_deref(), &submission, language.as_deref(), audit).await?;
        }
        Commands::Classify { file } => {
            commands::classify(cli.config.as_deref(), &file)?;
        }
        Commands::Languages => {
            commands::list_languages(cli.config.as_deref())?;
        }
        Commands::CheckConfig => {
            commands::check_config(cli.config.as_deref())?;
        }
    }

    Ok(())
}
