//! SELinux command implementation.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};

use crate::commands::{Switch, open_device, wait_for_changes};
use crate::config::PartsConfig;
use crate::device::{SettingChange, SettingEvent};
use crate::output::{self, Output};
use crate::selinux::{enforce_command, mode_name};

#[derive(Debug, Args)]
pub struct SelinuxArgs {
    #[command(subcommand)]
    pub action: SelinuxAction,
}

#[derive(Debug, Subcommand)]
pub enum SelinuxAction {
    /// Show enforcement, persistence and availability
    Status,
    /// Switch enforcement on (enforcing) or off (permissive)
    Mode {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Reapply the current mode after every reboot
    Persist {
        #[arg(value_enum)]
        state: Switch,
    },
}

pub fn run(args: SelinuxArgs, config: &PartsConfig) -> Result<()> {
    match args.action {
        SelinuxAction::Status => status(config),
        SelinuxAction::Mode { state } => mode(config, state.is_on()),
        SelinuxAction::Persist { state } => persist(config, state.is_on()),
    }
}

fn status(config: &PartsConfig) -> Result<()> {
    let device = open_device(config)?;
    let selinux = device.selinux();

    Output::header("SELinux");
    Output::kv("Mode", mode_name(selinux.live_value));
    Output::kv("Enforcing", output::switch(selinux.live_value, selinux.enabled));
    Output::kv("Persist", output::switch(selinux.persist, selinux.enabled));
    if let Some(stored) = device.store().get(crate::selinux::PREF_SELINUX_MODE) {
        Output::kv("Applied at boot", mode_name(stored));
    }
    Output::blank();
    Output::note(device.explanation());
    Ok(())
}

fn mode(config: &PartsConfig, enforcing: bool) -> Result<()> {
    let mut device = open_device(config)?;
    let command = enforce_command(enforcing)?;

    if config.dry_run {
        if !device.selinux().enabled {
            Output::warning("SELinux controls are disabled (no root access)");
        }
        Output::dry_run(format!("Would run: {command}"));
        return Ok(());
    }

    device
        .change(SettingChange::SelinuxMode(enforcing))
        .context("Cannot change SELinux mode")?;

    let spinner = Output::spinner(format!("Running {command}..."));
    let events = wait_for_changes(&mut device)?;

    for event in events {
        match event {
            SettingEvent::Applied { value, .. } => {
                spinner.finish_clear();
                Output::success(format!("SELinux is now {}", mode_name(value)));
                return Ok(());
            }
            SettingEvent::RolledBack {
                requested,
                actual,
                error,
                ..
            } => {
                spinner.finish_clear();
                Output::warning(format!(
                    "Could not switch to {}; still {}",
                    mode_name(requested),
                    mode_name(actual)
                ));
                bail!("{command} failed: {error}");
            }
            _ => {}
        }
    }

    spinner.finish_error("No result from the elevated shell");
    bail!("{command} did not report a result")
}

fn persist(config: &PartsConfig, persist: bool) -> Result<()> {
    let mut device = open_device(config)?;
    let current = device.selinux().live_value;

    if config.dry_run {
        let file = device.store().path().display().to_string();
        if persist {
            Output::dry_run(format!("Would store {} in {file}", mode_name(current)));
        } else {
            Output::dry_run(format!("Would clear the persisted mode in {file}"));
        }
        return Ok(());
    }

    device
        .change(SettingChange::SelinuxPersistence(persist))
        .context("Cannot change SELinux persistence")?;

    if persist {
        Output::success(format!("{} will be reapplied at boot", mode_name(current)));
    } else {
        Output::success("SELinux mode will not be reapplied at boot");
    }
    Ok(())
}
