//! SELinux enforcement: the one privileged toggle.

use std::path::{Path, PathBuf};

use parts_common::sysfs;
use tracing::debug;

use crate::error::PrivilegeError;
use crate::reconcile::StateQuery;
use crate::su::PrivilegedCommand;

/// Preference namespace holding the persisted mode.
pub const SELINUX_PREFS: &str = "selinux_pref";
/// Key of the enforcement toggle, in the UI and in the preference file.
pub const PREF_SELINUX_MODE: &str = "selinux_mode";
/// Key of the "reapply after reboot" switch.
pub const PREF_SELINUX_PERSISTENCE: &str = "selinux_persistence";
/// Kernel attribute reporting the live mode, relative to the sysfs root.
pub const ENFORCE_PATH: &str = "sys/fs/selinux/enforce";

/// The command that switches enforcement on or off.
pub fn enforce_command(enforcing: bool) -> Result<PrivilegedCommand, PrivilegeError> {
    PrivilegedCommand::new(if enforcing { "setenforce 1" } else { "setenforce 0" })
}

pub fn mode_name(enforcing: bool) -> &'static str {
    if enforcing { "enforcing" } else { "permissive" }
}

/// Reads the live mode from the kernel.
#[derive(Debug, Clone)]
pub struct EnforceQuery {
    path: PathBuf,
}

impl EnforceQuery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The query for `ENFORCE_PATH` below `sysfs_root`.
    pub fn under(sysfs_root: &Path) -> Self {
        Self::new(sysfs_root.join(ENFORCE_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when SELinux is absent or the attribute is unreadable.
    pub fn is_enforcing(&self) -> Option<bool> {
        match sysfs::read_bool(&self.path) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Cannot read SELinux mode");
                None
            }
        }
    }
}

impl StateQuery for EnforceQuery {
    fn query(&self, key: &str) -> Option<bool> {
        (key == PREF_SELINUX_MODE)
            .then(|| self.is_enforcing())
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_enforce_commands() {
        assert_eq!(enforce_command(true).unwrap().line(), "setenforce 1");
        assert_eq!(enforce_command(false).unwrap().line(), "setenforce 0");
    }

    #[test]
    fn test_query_reads_kernel_attribute() {
        let root = tempdir().unwrap();
        let path = root.path().join(ENFORCE_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let query = EnforceQuery::under(root.path());
        assert_eq!(query.query(PREF_SELINUX_MODE), None);

        std::fs::write(&path, "1").unwrap();
        assert_eq!(query.query(PREF_SELINUX_MODE), Some(true));
        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(query.query(PREF_SELINUX_MODE), Some(false));

        assert_eq!(query.query("speaker_gain"), None);
    }

    #[test]
    fn test_mode_name() {
        assert_eq!(mode_name(true), "enforcing");
        assert_eq!(mode_name(false), "permissive");
    }
}
