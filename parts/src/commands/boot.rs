//! Boot command: reapply persisted settings.

use anyhow::{Context, Result, bail};
use parts_common::prefs::PreferenceStore;

use crate::boot::{BootAction, reapply};
use crate::commands::broker;
use crate::config::PartsConfig;
use crate::output::Output;
use crate::selinux::{PREF_SELINUX_MODE, SELINUX_PREFS, enforce_command, mode_name};

pub fn run(config: &PartsConfig) -> Result<()> {
    let store = PreferenceStore::open(&config.state_dir, SELINUX_PREFS).with_context(|| {
        format!(
            "Failed to read persisted settings from {}",
            config.state_dir.display()
        )
    })?;

    if config.dry_run {
        match store.get(PREF_SELINUX_MODE) {
            Some(enforcing) => {
                Output::dry_run(format!("Would run: {}", enforce_command(enforcing)?))
            }
            None => Output::dry_run("No persisted SELinux mode; nothing to do"),
        }
        return Ok(());
    }

    match reapply(&broker(config), &store) {
        BootAction::NotPersisted => Output::info("No persisted SELinux mode"),
        BootAction::SkippedUnrooted { enforcing } => Output::warning(format!(
            "Persisted mode {} not applied: no root access",
            mode_name(enforcing)
        )),
        BootAction::Applied { enforcing } => {
            Output::success(format!("SELinux set to {}", mode_name(enforcing)))
        }
        BootAction::Failed { enforcing, error } => {
            bail!("Failed to reapply SELinux mode {}: {error}", mode_name(enforcing))
        }
    }
    Ok(())
}
