mod api;
mod cluster;
mod command;
mod commands;
mod config;
mod controller;
mod error;
mod event;
mod lock;
mod platform;
mod receiver;
mod release;
mod server;
mod sparrowfile;
mod tools;
mod vcs;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sparrow",
    version,
    about = "GitOps service that diffs and applies Helm charts from merge-request webhooks"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook service
    Serve {
        /// Path to config file (default: ~/.config/sparrow/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Check a sparrowfile and print its clusters and chart configurations
    Validate {
        /// Sparrowfile to validate
        #[arg(long, short, default_value = "sparrowfile.yaml")]
        file: PathBuf,
    },

    /// Detect the charts touched by changed paths and resolve their configuration
    Charts {
        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Sparrowfile name at the repository root
        #[arg(long, default_value = "sparrowfile.yaml")]
        sparrowfile: String,

        /// Changed paths, relative to the repository root
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Install the pinned Helm release and the helm-diff plugin
    Setup {
        /// Path to config file (default: ~/.config/sparrow/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            http_addr,
            log_level,
        } => commands::serve::run(config, http_addr, log_level),
        Commands::Validate { file } => commands::validate::run(&file),
        Commands::Charts {
            repo,
            sparrowfile,
            paths,
        } => commands::charts::run(&repo, &sparrowfile, &paths),
        Commands::Setup { config } => commands::setup::run(config),
    }
}
