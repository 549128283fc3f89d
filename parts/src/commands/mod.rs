//! CLI command implementations.

pub mod boot;
pub mod completions;
pub mod doctor;
pub mod selinux;
pub mod status;
pub mod sysfs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::config::PartsConfig;
use crate::device::{DeviceSettings, SettingEvent};
use crate::su::SuBroker;

/// Output format for read-only commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Table,
    Json,
}

/// `on`/`off` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

pub(crate) fn broker(config: &PartsConfig) -> Arc<SuBroker> {
    Arc::new(SuBroker::new(config.launcher(), config.timeout))
}

pub(crate) fn open_device(config: &PartsConfig) -> Result<DeviceSettings> {
    DeviceSettings::init(config, broker(config)).with_context(|| {
        format!(
            "Failed to read device settings (state dir {})",
            config.state_dir.display()
        )
    })
}

/// Pump `device` until every submitted change has come back.
///
/// Each change is bounded by the broker's timeout (twice, counting the
/// session handshake), so this cannot spin forever.
pub(crate) fn wait_for_changes(device: &mut DeviceSettings) -> Result<Vec<SettingEvent>> {
    let mut events = Vec::new();
    while device.pending() > 0 {
        events.extend(
            device
                .pump(Duration::from_millis(100))
                .context("Failed to record the result of a change")?,
        );
    }
    Ok(events)
}
