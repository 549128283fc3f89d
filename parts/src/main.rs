use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use parts::commands;
use parts::{Cli, Commands, PartsConfig};

fn main() -> Result<()> {
    // e.g., RUST_LOG=parts=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = PartsConfig::from_env()
        .context("Invalid configuration in environment")?
        .with_cli(&cli);

    tracing::debug!(
        su = %config.su.display(),
        timeout_ms = config.timeout.as_millis() as u64,
        workers = config.workers,
        state_dir = %config.state_dir.display(),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Status(args) => commands::status::run(args, &config),
        Commands::Selinux(args) => commands::selinux::run(args, &config),
        Commands::Torch(args) => commands::sysfs::run_torch(args, &config),
        Commands::Gain(args) => commands::sysfs::run_gain(args, &config),
        Commands::Boot => commands::boot::run(&config),
        Commands::Doctor(args) => commands::doctor::run(args, &config),
        Commands::Completions(args) => commands::completions::run(args),
    }
}
