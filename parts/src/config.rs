//! Runtime configuration.
//!
//! Values come from the environment and are then overridden by global CLI
//! flags:
//!
//! | Variable                   | Default                              |
//! |----------------------------|--------------------------------------|
//! | `PARTS_SU`                 | `su` (`sh` when already root)        |
//! | `PARTS_COMMAND_TIMEOUT_MS` | 10000                                |
//! | `PARTS_WORKERS`            | 1                                    |
//! | `PARTS_STATE_DIR`          | `$XDG_STATE_HOME/parts`              |
//! | `PARTS_SYSFS_ROOT`         | `/`                                  |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::BaseDirs;
use nix::unistd::Uid;

use crate::cli::Cli;
use crate::su::{DEFAULT_COMMAND_TIMEOUT, ShellLauncher};

pub const ENV_SU: &str = "PARTS_SU";
pub const ENV_TIMEOUT_MS: &str = "PARTS_COMMAND_TIMEOUT_MS";
pub const ENV_WORKERS: &str = "PARTS_WORKERS";
pub const ENV_STATE_DIR: &str = "PARTS_STATE_DIR";
pub const ENV_SYSFS_ROOT: &str = "PARTS_SYSFS_ROOT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartsConfig {
    /// Program started as the elevated shell.
    pub su: PathBuf,
    pub timeout: Duration,
    pub workers: usize,
    /// Where preference files live.
    pub state_dir: PathBuf,
    /// Prefix for every kernel attribute path.
    pub sysfs_root: PathBuf,
    pub dry_run: bool,
}

impl PartsConfig {
    /// Configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let su = lookup(ENV_SU)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_su);

        let timeout = match lookup(ENV_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_positive(ENV_TIMEOUT_MS, &raw)?),
            None => DEFAULT_COMMAND_TIMEOUT,
        };

        let workers = match lookup(ENV_WORKERS) {
            Some(raw) => usize::try_from(parse_positive(ENV_WORKERS, &raw)?)
                .with_context(|| format!("{ENV_WORKERS} is too large"))?,
            None => 1,
        };

        let state_dir = lookup(ENV_STATE_DIR)
            .map(PathBuf::from)
            .or_else(|| default_state_dir(&lookup))
            .unwrap_or_else(|| PathBuf::from(".local/state/parts"));

        let sysfs_root = lookup(ENV_SYSFS_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));

        Ok(Self {
            su,
            timeout,
            workers,
            state_dir,
            sysfs_root,
            dry_run: false,
        })
    }

    /// Apply global CLI flags on top.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(su) = &cli.su {
            self.su = su.clone();
        }
        if let Some(ms) = cli.timeout_ms {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = &cli.state_dir {
            self.state_dir = dir.clone();
        }
        if let Some(root) = &cli.sysfs_root {
            self.sysfs_root = root.clone();
        }
        self.dry_run = cli.dry_run;
        self
    }

    pub fn launcher(&self) -> ShellLauncher {
        ShellLauncher::new(&self.su)
    }

    /// A kernel attribute below the configured sysfs root.
    pub fn sysfs_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.sysfs_root.join(relative)
    }
}

fn default_su() -> PathBuf {
    // Already root: any shell is elevated, and su may not even exist.
    if Uid::effective().is_root() {
        PathBuf::from("sh")
    } else {
        PathBuf::from("su")
    }
}

fn default_state_dir(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    lookup("XDG_STATE_HOME")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|h| PathBuf::from(h).join(".local/state")))
        .or_else(|| BaseDirs::new().map(|d| d.home_dir().join(".local/state")))
        .map(|dir| dir.join("parts"))
}

fn parse_positive(name: &str, raw: &str) -> Result<u64> {
    let value: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a positive integer, got {raw:?}"))?;
    if value == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(value)
}
