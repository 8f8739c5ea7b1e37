//! gpuq CLI
//!
//! Queue for a GPU, run a command on it, and inspect the queue.

mod commands;
mod hangup;

use clap::{Parser, Subcommand};
use gpuq_core::GpuqConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpuq - first-come-first-served GPU arbitration between processes
#[derive(Parser, Debug)]
#[command(name = "gpuq")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the shared queue
    #[arg(long, global = true)]
    queue_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show every live ticket in queue order
    List,

    /// Wait for a GPU, then run a command on it
    Run {
        /// Seconds between queue checks
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Command to run, with its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show GPU information
    Gpus,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<GpuqConfig> {
        let mut config = match &self.config {
            Some(path) => GpuqConfig::from_file(path)?,
            None => GpuqConfig::default(),
        };

        if let Some(path) = &self.queue_path {
            config.queue.path = path.clone();
        }
        if let Commands::Run {
            poll_interval: Some(secs),
            ..
        } = &self.command
        {
            config.arbiter.poll_interval_secs = *secs;
        }

        Ok(config)
    }
}

// Binding edits the process environment, so keep the runtime on one thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::List => {
            commands::list(&config)?;
        }
        Commands::Run { command, .. } => {
            let code = commands::run(&config, command).await?;
            std::process::exit(code);
        }
        Commands::Gpus => {
            commands::gpus(&config)?;
        }
    }

    Ok(())
}
