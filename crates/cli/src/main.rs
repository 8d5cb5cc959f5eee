//! Visage CLI - Main Entry Point
//!
//! Visual regression checks for Storybook component libraries.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;
mod output;

use commands::{check, stories};

/// Visage - visual regression checks for Storybook stories
#[derive(Parser)]
#[command(name = "visage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture every story and compare it against its baseline
    Check(check::CheckArgs),

    /// List the stories found in a project
    Stories(stories::StoriesArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Check(args) => check::execute(args, cli.format).await?,
        Commands::Stories(args) => stories::execute(args, cli.format)?,
        Commands::Version => {
            println!("Visage v{}", env!("CARGO_PKG_VERSION"));
            println!("Visual regression checks for Storybook component libraries");
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
