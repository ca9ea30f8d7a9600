//! Sitescope CLI: research a location and write a markdown risk report.

mod commands;
mod run;

use clap::Parser;
use sitescope_core::RiskCategory;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sitescope: location risk reports from iterative research
#[derive(Parser, Debug)]
#[command(name = "sitescope", version, about, long_about = None)]
struct Cli {
    /// Location or site to analyse (read from stdin if omitted)
    topic: Option<String>,

    /// Number of aspects to research (1-10)
    #[arg(short, long, conflicts_with = "quick")]
    breadth: Option<u32>,

    /// Refinement iterations per aspect (1-5)
    #[arg(short, long, conflicts_with = "quick")]
    depth: Option<u32>,

    /// Quick research: two aspects, one iteration each
    #[arg(long)]
    quick: bool,

    /// Risk category to emphasise (repeatable), e.g. safety, financial
    #[arg(long = "focus", value_name = "CATEGORY")]
    focus: Vec<RiskCategory>,

    /// Directory that receives the report
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Model or deployment name
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory (for `.sitescope/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Print the finished report to stdout
    #[arg(long)]
    print: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration (credentials redacted)
    Show,
    /// Write a default workspace config file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "sitescope", "sitescope")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sitescope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = run::RunOptions::from_cli(&cli);
    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace);
    }

    run::run_analysis(options, &workspace).await
}
