//! fleetroll: rolling replacement of autoscaling group members and
//! reviewed change-set application.
//!
//! The control plane is seeded from a fleet description file, so a rotation
//! or a change-set review can be rehearsed end to end before it is run for
//! real.
//!
//! # Usage
//!
//! ```text
//! fleetroll --fleet fleet.toml doctor --stack web-prod
//! fleetroll --config fleetroll.toml --fleet fleet.toml rotate --stack web-prod
//! fleetroll --fleet fleet.toml change-set --stack web-prod --name resize --template stack.json
//! ```

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use fleetroll_core::FleetrollConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod sink;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "fleetroll",
    about = "Roll out new launch configurations across an autoscaling group",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fleet description that seeds the control plane.
    #[arg(short, long, global = true)]
    fleet: Option<PathBuf>,

    /// How remote commands are run.
    #[arg(long, value_enum, default_value = "simulated", global = true)]
    executor: ExecutorKind,

    /// Never prompt; apply change sets without confirmation.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExecutorKind {
    /// Commands act on the simulated fleet.
    Simulated,
    /// Commands are run through the local ssh client.
    Ssh,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace every member running an outdated launch configuration.
    Rotate {
        /// Stack that owns the group.
        #[arg(short, long)]
        stack: String,
        /// Print the rotation report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check that the remote shell reaches a member of the stack.
    Doctor {
        #[arg(short, long)]
        stack: String,
    },
    /// Create a change set, show its diff, and apply or discard it.
    ChangeSet {
        #[arg(short, long)]
        stack: String,
        /// Change set name.
        #[arg(short, long)]
        name: String,
        /// Template body to propose.
        #[arg(short, long)]
        template: PathBuf,
        /// Seconds to wait for the change set to be created.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the effective configuration.
    Config,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetroll=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FleetrollConfig> {
    let mut config = match &cli.config {
        Some(path) => FleetrollConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FleetrollConfig::default(),
    };
    config.ssh.apply_env(|key| std::env::var(key).ok());
    if cli.non_interactive {
        config.interactive = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;
    debug!(interactive = config.interactive, executor = ?cli.executor, "configuration loaded");

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let fleet = cli
        .fleet
        .as_deref()
        .context("--fleet is required for this command")?;
    let ctx = Context::new(fleet, config, cli.executor, cli.log_format)?;

    match cli.command {
        Commands::Rotate { stack, json } => commands::rotate::run(&ctx, &stack, json).await,
        Commands::Doctor { stack } => commands::doctor::run(&ctx, &stack).await,
        Commands::ChangeSet {
            stack,
            name,
            template,
            timeout,
        } => commands::change_set::run(&ctx, &stack, &name, &template, timeout).await,
        Commands::Config => Ok(()),
    }
}
