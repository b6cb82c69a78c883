mod config_cmd;
mod list_cmd;
mod watch_cmd;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionhub_runtime_config::RuntimeConfig;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(
    name = "sessionhub",
    about = "sessionhub CLI - browse AI coding sessions across local and remote roots"
)]
struct Cli {
    /// Config file (default: ~/.config/sessionhub/sessionhub.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered contexts
    Contexts,

    /// List projects of the active context
    Projects,

    /// Show one page of the combined session feed
    Sessions {
        /// Cursor printed by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Page size (default: pagination.page_size)
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print the effective configuration
    Config,

    /// Print debounced session changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sessionhub=info".parse().expect("static log directive"))
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Contexts => list_cmd::run_contexts(&config, cli.json).await,
        Commands::Projects => list_cmd::run_projects(&config, cli.json).await,
        Commands::Sessions { cursor, limit } => {
            list_cmd::run_sessions(&config, cursor.as_deref(), limit, cli.json).await
        }
        Commands::Config => config_cmd::run(&config, cli.json),
        Commands::Watch => watch_cmd::run(config).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load_from(path)
            .with_context(|| format!("load config {}", path.display())),
        None => RuntimeConfig::load().context("load config"),
    }
}
