//! CLI argument definitions for parts.
//!
//! Kept apart from `main.rs` so that configuration loading and shell
//! completion generation can reference these types.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "parts")]
#[command(about = "Device parts - SELinux, torch and audio gain settings")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show what would be done without making changes
    #[arg(long, short = 'n', global = true)]
    pub dry_run: bool,

    /// Bound on a single privileged command, in milliseconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// Program started as the elevated shell (default: su)
    #[arg(long, global = true)]
    pub su: Option<PathBuf>,

    /// Directory holding persisted preferences
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Prefix for kernel attribute paths (for testing on a fake tree)
    #[arg(long, global = true, hide = true)]
    pub sysfs_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show every setting and whether it can be changed
    Status(commands::status::StatusArgs),

    /// SELinux enforcement and its persistence across reboots
    Selinux(commands::selinux::SelinuxArgs),

    /// Set the yellow torch brightness
    Torch(commands::sysfs::TorchArgs),

    /// Set speaker or earpiece gain
    Gain(commands::sysfs::GainArgs),

    /// Reapply persisted settings (run once after boot)
    Boot,

    /// Check root access and sysfs availability
    Doctor(commands::doctor::DoctorArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}
