//! Reapplying persisted settings after a reboot.

use parts_common::prefs::PreferenceStore;
use tracing::{info, warn};

use crate::error::PrivilegeError;
use crate::selinux::{self, PREF_SELINUX_MODE};
use crate::su::SuBroker;

/// What [`reapply`] did with the stored SELinux mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootAction {
    /// Nothing stored for this key.
    NotPersisted,
    /// Stored, but root is unavailable.
    SkippedUnrooted { enforcing: bool },
    Applied { enforcing: bool },
    Failed {
        enforcing: bool,
        error: PrivilegeError,
    },
}

impl BootAction {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Run `setenforce` with the stored mode, if one is stored. Not retried.
pub fn reapply(broker: &SuBroker, store: &PreferenceStore) -> BootAction {
    let Some(enforcing) = store.get(PREF_SELINUX_MODE) else {
        info!("No persisted SELinux mode");
        return BootAction::NotPersisted;
    };

    if !broker.is_rooted() {
        warn!(enforcing, "Persisted SELinux mode not applied: no root access");
        return BootAction::SkippedUnrooted { enforcing };
    }

    match selinux::enforce_command(enforcing).and_then(|command| broker.execute(&command)) {
        Ok(_) => {
            info!(mode = selinux::mode_name(enforcing), "Reapplied SELinux mode");
            BootAction::Applied { enforcing }
        }
        Err(error) => {
            warn!(%error, "Failed to reapply SELinux mode");
            BootAction::Failed { enforcing, error }
        }
    }
}
