//! The settings model behind the command-line surface.
//!
//! [`DeviceSettings`] owns every toggle and lives on the interactive thread.
//! SELinux changes go through the worker pool and come back via
//! [`DeviceSettings::pump`]; torch and gain values are plain sysfs writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parts_common::error::CommonError;
use parts_common::prefs::PreferenceStore;
use parts_common::sysfs;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PartsConfig;
use crate::error::PrivilegeError;
use crate::reconcile::{Outcome, Reconciler, ToggleState};
use crate::selinux::{self, EnforceQuery, PREF_SELINUX_MODE, SELINUX_PREFS};
use crate::su::SuBroker;
use crate::task::{TaskId, TaskRunner};

pub const PREF_TORCH_BRIGHTNESS: &str = "yellow_torch_brightness";
pub const PREF_SPEAKER_GAIN: &str = "speaker_gain";
pub const PREF_EARPIECE_GAIN: &str = "earpiece_gain";

pub const TORCH_PATH: &str = "sys/class/leds/led:torch_1/max_brightness";
pub const SPEAKER_GAIN_PATH: &str = "sys/kernel/sound_control/speaker_gain";
pub const EARPIECE_GAIN_PATH: &str = "sys/kernel/sound_control/earpiece_gain";

pub const SELINUX_EXPLANATION: &str = "Permissive mode stops SELinux from blocking \
     denied operations; they are only logged. Persistence reapplies the chosen \
     mode on every boot.";
pub const SELINUX_UNROOTED_NOTE: &str =
    "Root access was not found, so SELinux settings cannot be changed.";

/// A change requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    SelinuxMode(bool),
    SelinuxPersistence(bool),
    TorchBrightness(u32),
    SpeakerGain(i32),
    EarpieceGain(i32),
}

impl SettingChange {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SelinuxMode(_) => PREF_SELINUX_MODE,
            Self::SelinuxPersistence(_) => selinux::PREF_SELINUX_PERSISTENCE,
            Self::TorchBrightness(_) => PREF_TORCH_BRIGHTNESS,
            Self::SpeakerGain(_) => PREF_SPEAKER_GAIN,
            Self::EarpieceGain(_) => PREF_EARPIECE_GAIN,
        }
    }

    /// The requested value as it would be written or shown.
    pub fn value_text(&self) -> String {
        match self {
            Self::SelinuxMode(on) | Self::SelinuxPersistence(on) => {
                (if *on { "on" } else { "off" }).to_string()
            }
            Self::TorchBrightness(v) => v.to_string(),
            Self::SpeakerGain(v) | Self::EarpieceGain(v) => v.to_string(),
        }
    }
}

/// Something that happened to a setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingEvent {
    /// A privileged change is running in the background.
    Submitted { key: String, task: TaskId },
    Applied { key: String, value: bool },
    RolledBack {
        key: String,
        requested: bool,
        actual: bool,
        error: String,
    },
    PersistenceChanged { key: String, persist: bool },
    Written { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum SettingError {
    #[error("{key} is disabled: {reason}")]
    Disabled { key: String, reason: String },

    #[error("a change to {key} is still pending")]
    Busy { key: String },

    #[error("{key} is not available ({path} is not writable)")]
    Unavailable { key: String, path: PathBuf },

    #[error(transparent)]
    Store(#[from] CommonError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

/// A numeric setting backed directly by a kernel attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysfsSetting {
    pub key: &'static str,
    pub path: PathBuf,
    pub enabled: bool,
    pub value: Option<String>,
}

impl SysfsSetting {
    fn probe(key: &'static str, path: PathBuf) -> Self {
        let enabled = sysfs::is_writable(&path);
        let value = sysfs::read_value(&path).ok();
        debug!(key, path = %path.display(), enabled, "Probed sysfs setting");
        Self {
            key,
            path,
            enabled,
            value,
        }
    }

    fn write(&mut self, value: impl ToString) -> Result<SettingEvent, SettingError> {
        if !self.enabled {
            return Err(SettingError::Unavailable {
                key: self.key.to_string(),
                path: self.path.clone(),
            });
        }
        let value = value.to_string();
        sysfs::write_value(&self.path, &value)?;
        info!(key = self.key, %value, "Wrote sysfs setting");
        self.value = Some(value.clone());
        Ok(SettingEvent::Written {
            key: self.key.to_string(),
            value,
        })
    }
}

/// Snapshot for `parts status`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub rooted: bool,
    pub selinux: ToggleState,
    pub explanation: String,
    pub sysfs: Vec<SysfsSetting>,
}

pub struct DeviceSettings {
    broker: Arc<SuBroker>,
    runner: TaskRunner<bool>,
    reconciler: Reconciler<EnforceQuery>,
    selinux: ToggleState,
    explanation: String,
    torch: SysfsSetting,
    speaker_gain: SysfsSetting,
    earpiece_gain: SysfsSetting,
}

impl DeviceSettings {
    /// Read the current state of every setting.
    ///
    /// Root is probed here; without it both SELinux controls start disabled
    /// and nothing is ever submitted for them.
    pub fn init(config: &PartsConfig, broker: Arc<SuBroker>) -> Result<Self, SettingError> {
        let store = PreferenceStore::open(&config.state_dir, SELINUX_PREFS)?;
        let query = EnforceQuery::under(&config.sysfs_root);

        let enforcing = query.is_enforcing().unwrap_or_else(|| {
            warn!(path = %query.path().display(), "SELinux mode unknown; assuming permissive");
            false
        });
        let persist = store.contains(PREF_SELINUX_MODE);
        let mut selinux = ToggleState::new(PREF_SELINUX_MODE, enforcing, persist);
        let mut explanation = SELINUX_EXPLANATION.to_string();

        if !broker.is_rooted() {
            info!("No root access; disabling SELinux controls");
            selinux = selinux.disabled();
            explanation.push('\n');
            explanation.push_str(SELINUX_UNROOTED_NOTE);
        }

        let runner = TaskRunner::new(broker.clone(), config.workers);

        Ok(Self {
            broker,
            runner,
            reconciler: Reconciler::new(query, store),
            selinux,
            explanation,
            torch: SysfsSetting::probe(PREF_TORCH_BRIGHTNESS, config.sysfs_path(TORCH_PATH)),
            speaker_gain: SysfsSetting::probe(
                PREF_SPEAKER_GAIN,
                config.sysfs_path(SPEAKER_GAIN_PATH),
            ),
            earpiece_gain: SysfsSetting::probe(
                PREF_EARPIECE_GAIN,
                config.sysfs_path(EARPIECE_GAIN_PATH),
            ),
        })
    }

    pub fn selinux(&self) -> &ToggleState {
        &self.selinux
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_rooted(&self) -> bool {
        self.broker.is_rooted()
    }

    pub fn store(&self) -> &PreferenceStore {
        self.reconciler.store()
    }

    pub fn torch(&self) -> &SysfsSetting {
        &self.torch
    }

    pub fn speaker_gain(&self) -> &SysfsSetting {
        &self.speaker_gain
    }

    pub fn earpiece_gain(&self) -> &SysfsSetting {
        &self.earpiece_gain
    }

    /// Background tasks submitted since `init`.
    pub fn submitted(&self) -> u64 {
        self.runner.submitted()
    }

    /// Changes still running in the background.
    pub fn pending(&self) -> usize {
        self.runner.outstanding()
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            rooted: self.is_rooted(),
            selinux: self.selinux.clone(),
            explanation: self.explanation.clone(),
            sysfs: vec![
                self.torch.clone(),
                self.speaker_gain.clone(),
                self.earpiece_gain.clone(),
            ],
        }
    }

    /// Apply a user change. Never blocks on a privileged command.
    pub fn change(&mut self, change: SettingChange) -> Result<SettingEvent, SettingError> {
        debug!(?change, "Setting change requested");
        match change {
            SettingChange::SelinuxMode(enforcing) => {
                self.ensure_selinux_enabled()?;
                let command = selinux::enforce_command(enforcing)?;
                let task = self
                    .runner
                    .submit(PREF_SELINUX_MODE, command, enforcing)?;
                self.reconciler.begin(&mut self.selinux);
                Ok(SettingEvent::Submitted {
                    key: PREF_SELINUX_MODE.to_string(),
                    task,
                })
            }
            SettingChange::SelinuxPersistence(persist) => {
                self.ensure_selinux_enabled()?;
                self.reconciler
                    .set_persistence(&mut self.selinux, persist)?;
                Ok(SettingEvent::PersistenceChanged {
                    key: PREF_SELINUX_MODE.to_string(),
                    persist,
                })
            }
            SettingChange::TorchBrightness(value) => self.torch.write(value),
            SettingChange::SpeakerGain(value) => self.speaker_gain.write(value),
            SettingChange::EarpieceGain(value) => self.earpiece_gain.write(value),
        }
    }

    /// Wait up to `wait` for background work, then fold in everything that
    /// has finished.
    pub fn pump(&mut self, wait: Duration) -> Result<Vec<SettingEvent>, SettingError> {
        let mut events = Vec::new();
        let first = self.runner.next_timeout(wait);
        let rest = std::iter::from_fn(|| self.runner.try_next()).collect::<Vec<_>>();

        for done in first.into_iter().chain(rest) {
            if done.key != PREF_SELINUX_MODE {
                warn!(key = %done.key, task = %done.id, "Completion for unknown setting");
                continue;
            }

            let outcome = self
                .reconciler
                .on_result(&mut self.selinux, done.param, &done.result)?;
            self.reconciler.settle(&mut self.selinux);

            events.push(match outcome {
                Outcome::Applied { value } => SettingEvent::Applied {
                    key: done.key,
                    value,
                },
                Outcome::RolledBack { requested, actual } => SettingEvent::RolledBack {
                    key: done.key,
                    requested,
                    actual,
                    error: done
                        .result
                        .error_text()
                        .unwrap_or_else(|| "unknown error".to_string()),
                },
            });
        }
        Ok(events)
    }

    fn ensure_selinux_enabled(&self) -> Result<(), SettingError> {
        if !self.selinux.enabled {
            return Err(SettingError::Disabled {
                key: PREF_SELINUX_MODE.to_string(),
                reason: SELINUX_UNROOTED_NOTE.to_string(),
            });
        }
        if self.selinux.is_pending() {
            return Err(SettingError::Busy {
                key: PREF_SELINUX_MODE.to_string(),
            });
        }
        Ok(())
    }
}

/// Where the SELinux attribute lives for `config`. Used by `doctor`.
pub fn enforce_path(config: &PartsConfig) -> PathBuf {
    config.sysfs_path(selinux::ENFORCE_PATH)
}

/// Every sysfs-backed setting with its path, for diagnostics.
pub fn sysfs_paths(root: &Path) -> [(&'static str, PathBuf); 3] {
    [
        (PREF_TORCH_BRIGHTNESS, root.join(TORCH_PATH)),
        (PREF_SPEAKER_GAIN, root.join(SPEAKER_GAIN_PATH)),
        (PREF_EARPIECE_GAIN, root.join(EARPIECE_GAIN_PATH)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::TogglePhase;
    use crate::su::ShellLauncher;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const WAIT: Duration = Duration::from_secs(10);

    struct Device {
        root: TempDir,
        config: PartsConfig,
    }

    impl Device {
        fn new(enforcing: bool) -> Self {
            let root = tempdir().unwrap();
            let config = PartsConfig {
                su: PathBuf::from("sh"),
                timeout: Duration::from_secs(5),
                workers: 1,
                state_dir: root.path().join("state"),
                sysfs_root: root.path().join("sysfs"),
                dry_run: false,
            };
            let device = Self { root, config };
            device.set_enforce(enforcing);
            device
        }

        fn enforce_path(&self) -> PathBuf {
            enforce_path(&self.config)
        }

        fn set_enforce(&self, enforcing: bool) {
            let path = self.enforce_path();
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, if enforcing { "1" } else { "0" }).unwrap();
        }

        fn add_attribute(&self, relative: &str, value: &str) -> PathBuf {
            let path = self.config.sysfs_path(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, value).unwrap();
            path
        }

        /// A broker whose shell stands in for `su`: its `setenforce` writes
        /// the fake kernel attribute, or fails when `fail` is set.
        fn broker(&self, rooted: bool, fail: bool) -> Arc<SuBroker> {
            let bin = self.root.path().join("bin");
            fs::create_dir_all(&bin).unwrap();
            let script = if fail {
                "#!/bin/sh\necho \"setenforce: SELinux is disabled\" >&2\nexit 1\n".to_string()
            } else {
                format!(
                    "#!/bin/sh\nprintf '%s' \"$1\" > '{}'\n",
                    self.enforce_path().display()
                )
            };
            let setenforce = bin.join("setenforce");
            fs::write(&setenforce, script).unwrap();
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&setenforce, fs::Permissions::from_mode(0o755)).unwrap();

            let path = format!(
                "{}:{}",
                bin.display(),
                std::env::var("PATH").unwrap_or_default()
            );
            let launcher = ShellLauncher::new("sh").env("PATH", path);
            Arc::new(SuBroker::with_probe(
                launcher,
                move || rooted,
                Duration::from_secs(5),
            ))
        }

        fn settings(&self, broker: Arc<SuBroker>) -> DeviceSettings {
            DeviceSettings::init(&self.config, broker).unwrap()
        }
    }

    #[test]
    fn test_enforce_success_commits() {
        let device = Device::new(false);
        let mut settings = device.settings(device.broker(true, false));
        assert!(!settings.selinux().live_value);

        let event = settings.change(SettingChange::SelinuxMode(true)).unwrap();
        assert!(matches!(event, SettingEvent::Submitted { .. }));
        assert!(settings.selinux().is_pending());
        assert!(!settings.selinux().live_value);

        let events = settings.pump(WAIT).unwrap();
        assert_eq!(
            events,
            vec![SettingEvent::Applied {
                key: PREF_SELINUX_MODE.into(),
                value: true
            }]
        );
        assert!(settings.selinux().live_value);
        assert_eq!(settings.selinux().phase, TogglePhase::Idle);
        assert_eq!(fs::read_to_string(device.enforce_path()).unwrap(), "1");
    }

    #[test]
    fn test_enforce_failure_rolls_back_to_actual() {
        let device = Device::new(false);
        let mut settings = device.settings(device.broker(true, true));

        settings.change(SettingChange::SelinuxMode(true)).unwrap();
        let events = settings.pump(WAIT).unwrap();

        let [SettingEvent::RolledBack {
            requested, actual, error, ..
        }] = events.as_slice()
        else {
            panic!("expected a rollback, got {events:?}");
        };
        assert!(*requested);
        assert!(!*actual);
        assert!(error.contains("SELinux is disabled"), "{error}");
        assert!(!settings.selinux().live_value);
    }

    #[test]
    fn test_persistence_on_while_enforcing() {
        let device = Device::new(true);
        let mut settings = device.settings(device.broker(true, false));
        assert!(!settings.selinux().persist);

        settings
            .change(SettingChange::SelinuxPersistence(true))
            .unwrap();
        assert!(settings.selinux().live_value);
        assert_eq!(settings.store().get(PREF_SELINUX_MODE), Some(true));
        assert_eq!(settings.submitted(), 0);

        // A fresh model sees the stored flag.
        let reopened = device.settings(device.broker(true, false));
        assert!(reopened.selinux().persist);
    }

    #[test]
    fn test_unrooted_disables_selinux_controls() {
        let device = Device::new(true);
        let broker = device.broker(false, false);
        let mut settings = device.settings(broker.clone());

        assert!(!settings.selinux().enabled);
        assert!(!settings.selinux().persist);
        assert!(settings.explanation().ends_with(SELINUX_UNROOTED_NOTE));

        let err = settings.change(SettingChange::SelinuxMode(false)).unwrap_err();
        assert!(matches!(err, SettingError::Disabled { .. }));
        let err = settings
            .change(SettingChange::SelinuxPersistence(true))
            .unwrap_err();
        assert!(matches!(err, SettingError::Disabled { .. }));

        assert_eq!(settings.submitted(), 0);
        assert_eq!(broker.commands_issued(), 0);
        assert_eq!(broker.sessions_opened(), 0);
    }

    #[test]
    fn test_change_while_pending_is_busy() {
        let device = Device::new(false);
        let mut settings = device.settings(device.broker(true, false));
        settings.change(SettingChange::SelinuxMode(true)).unwrap();
        let err = settings.change(SettingChange::SelinuxMode(false)).unwrap_err();
        assert!(matches!(err, SettingError::Busy { .. }));
        settings.pump(WAIT).unwrap();
        assert_eq!(settings.submitted(), 1);
    }

    #[test]
    fn test_persisted_mode_follows_applied_change() {
        let device = Device::new(true);
        let mut settings = device.settings(device.broker(true, false));
        settings
            .change(SettingChange::SelinuxPersistence(true))
            .unwrap();
        settings.change(SettingChange::SelinuxMode(false)).unwrap();
        settings.pump(WAIT).unwrap();
        assert_eq!(settings.store().get(PREF_SELINUX_MODE), Some(false));
    }

    #[test]
    fn test_sysfs_writes() {
        let device = Device::new(false);
        let torch = device.add_attribute(TORCH_PATH, "0\n");
        let speaker = device.add_attribute(SPEAKER_GAIN_PATH, "0\n");
        let mut settings = device.settings(device.broker(true, false));

        assert!(settings.torch().enabled);
        assert_eq!(settings.torch().value.as_deref(), Some("0"));

        let event = settings.change(SettingChange::TorchBrightness(120)).unwrap();
        assert_eq!(
            event,
            SettingEvent::Written {
                key: PREF_TORCH_BRIGHTNESS.into(),
                value: "120".into()
            }
        );
        assert_eq!(fs::read_to_string(torch).unwrap().trim(), "120");

        settings.change(SettingChange::SpeakerGain(-4)).unwrap();
        assert_eq!(fs::read_to_string(speaker).unwrap().trim(), "-4");
        assert_eq!(settings.submitted(), 0);
    }

    #[test]
    fn test_missing_attribute_is_unavailable() {
        let device = Device::new(false);
        let mut settings = device.settings(device.broker(true, false));
        assert!(!settings.earpiece_gain().enabled);
        let err = settings.change(SettingChange::EarpieceGain(3)).unwrap_err();
        assert!(matches!(err, SettingError::Unavailable { .. }));
    }

    #[test]
    fn test_pump_without_work_returns_nothing() {
        let device = Device::new(false);
        let mut settings = device.settings(device.broker(true, false));
        assert!(settings.pump(Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_status_serializes() {
        let device = Device::new(true);
        let settings = device.settings(device.broker(true, false));
        let json = serde_json::to_value(settings.status()).unwrap();
        assert_eq!(json["selinux"]["live_value"], true);
        assert_eq!(json["selinux"]["phase"], "idle");
        assert_eq!(json["sysfs"].as_array().unwrap().len(), 3);
    }
}
