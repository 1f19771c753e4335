//! ncluster CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use ncluster_foundation::{BackendKind, ClusterConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ncluster - run shell commands on ephemeral tasks and jobs
#[derive(Parser, Debug)]
#[command(name = "ncluster")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Backend to use (local, container); overrides config and NCLUSTER_BACKEND
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Root directory for run logs
    #[arg(long)]
    logdir_root: Option<PathBuf>,

    /// Container image (container backend)
    #[arg(long)]
    image: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command on a single task
    Task {
        /// Task name (auto-assigned when omitted)
        #[arg(short, long, default_value = "")]
        name: String,

        #[command(flatten)]
        run: cli::RunArgs,
    },
    /// Run a command on every task of a job
    Job {
        /// Job name (auto-assigned when omitted)
        #[arg(short, long, default_value = "")]
        name: String,

        /// Number of tasks
        #[arg(short, long, default_value = "2")]
        tasks: usize,

        #[command(flatten)]
        run: cli::RunArgs,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = ClusterConfig::load()?;
    if let Some(backend) = args.backend {
        config = config.backend(backend);
    }
    if let Some(root) = args.logdir_root {
        config = config.logdir_root(root);
    }
    if let Some(image) = args.image {
        config.container.image = Some(image);
    }
    config.validate()?;

    match args.command {
        Command::Task { name, run } => cli::run_task(&config, &name, run).await,
        Command::Job { name, tasks, run } => cli::run_job(&config, &name, tasks, run).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
