//! parts - device settings through a privileged shell
//!
//! Toggles kernel-level settings (SELinux enforcement, torch brightness,
//! speaker/earpiece gain) from an unprivileged front-end.
//!
//! # Layers
//!
//! - [`su`]: one long-lived root shell, guarded so a single command runs at
//!   a time, with per-command timeouts and exit status capture.
//! - [`task`]: a worker pool that runs privileged commands off the
//!   interactive thread and hands results back over a channel.
//! - [`reconcile`]: folds results into toggle state; a failed change shows
//!   the value the system actually has, never the one requested.
//! - [`device`]: the settings model the CLI drives.
//! - [`boot`]: reapplies persisted settings after a reboot.

pub mod boot;
pub mod cli;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod output;
pub mod reconcile;
pub mod selinux;
pub mod su;
pub mod task;

pub use cli::{Cli, Commands};
pub use config::PartsConfig;
pub use error::PrivilegeError;
