mod commands;
mod dry_run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(version)]
#[command(about = "Provision a multi-tier web application stack as one resumable deployment", long_about = None)]
struct Cli {
    /// Stack file (default: stack.yaml discovered from the current directory)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the stack file and its dependency graph
    Validate,
    /// Print the provisioning order with each resource's dependencies
    Order,
    /// Provision the stack (dry run), resuming from the recorded ledger
    Up {
        /// Maximum number of resources provisioned at once (1-8)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Stop dispatching new work after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Delete what this run created if the run does not fully succeed
        #[arg(long)]
        destroy_on_failure: bool,
        /// Remove a ledger lock left behind by a run that no longer exists
        #[arg(long)]
        force_unlock: bool,
    },
    /// Show the recorded state of every resource
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a stack.yaml containing the web application stack
    Init {
        /// Overwrite an existing stack.yaml
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for reports
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let file = cli.file.as_deref();
    match cli.command {
        Commands::Validate => commands::validate::handle(file),
        Commands::Order => commands::order::handle(file),
        Commands::Up {
            concurrency,
            timeout,
            destroy_on_failure,
            force_unlock,
        } => {
            let options = commands::up::UpOptions {
                concurrency,
                timeout,
                destroy_on_failure,
                force_unlock,
            };
            let succeeded = commands::up::handle(file, options).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status { json } => commands::status::handle(file, json).await,
        Commands::Init { force } => commands::init::handle(force),
    }
}
