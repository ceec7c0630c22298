use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{PlanArgs, RecoverArgs, RunArgs};

#[derive(Parser)]
#[command(name = "breakout")]
#[command(about = "Multi-leg options breakout engine for OpenAlgo", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session
    Run(RunArgs),
    /// Print the effective per-leg configuration
    Plan(PlanArgs),
    /// List sessions that never closed and their open positions
    Recover(RecoverArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run_session(args).await?,
        Commands::Plan(args) => commands::run_plan(&args)?,
        Commands::Recover(args) => commands::run_recover(&args)?,
    }

    Ok(())
}

fn init_logging(json: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match (log_file, json) {
        (Some(path), json) => {
            let file = open_log_file(Path::new(path))?;
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        (None, true) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .init(),
        (None, false) => tracing_subscriber::fmt().with_env_filter(filter()).init(),
    }
    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
