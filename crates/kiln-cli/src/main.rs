//! Kiln command line.
//!
//! # Quick Start
//!
//! ```bash
//! # Run a server that logs every chunk and echoes it back
//! kiln serve --port 7000 --echo
//!
//! # Talk to it (new terminal)
//! kiln send "hello" --wait-reply
//!
//! # Stop it remotely
//! kiln send exit
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln_config::{ConfigLoader, KilnConfig};
use tracing_subscriber::EnvFilter;

/// Kiln - a cooperative, event-loop-driven TCP socket server.
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Extra configuration file, applied over kiln.toml and kiln.local.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for kiln.toml (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,
}

impl GlobalArgs {
    fn load(&self) -> Result<KilnConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(project) = &self.project {
            loader = loader.with_project_dir(project);
        }
        if let Some(file) = &self.config {
            loader = loader.with_file(file);
        }
        loader.load().context("Failed to load configuration")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Run the server until the exit sentinel, Ctrl+C, or SIGTERM.
    Serve(commands::serve::ServeArgs),

    /// Connect to a server and send one message.
    Send(commands::send::SendArgs),

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Serve(args) => {
            let config = cli.global.load()?;
            init_logging(&config.log.filter)?;
            commands::serve::run(config, &args)
        }
        Commands::Send(args) => {
            init_logging("warn")?;
            commands::send::run(&args)
        }
        Commands::Config => {
            let config = cli.global.load()?;
            commands::config::show(&config)
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("Invalid log filter '{default_filter}'"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
