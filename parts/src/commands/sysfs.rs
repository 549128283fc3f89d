//! Torch and gain commands: direct kernel attribute writes.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::commands::open_device;
use crate::config::PartsConfig;
use crate::device::{DeviceSettings, SettingChange, SysfsSetting};
use crate::output::Output;

#[derive(Debug, Args)]
pub struct TorchArgs {
    /// Brightness written to the yellow torch LED
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GainTarget {
    Speaker,
    Earpiece,
}

#[derive(Debug, Args)]
pub struct GainArgs {
    #[arg(value_enum)]
    pub target: GainTarget,

    /// Gain value; may be negative
    #[arg(allow_negative_numbers = true)]
    pub value: i32,
}

pub fn run_torch(args: TorchArgs, config: &PartsConfig) -> Result<()> {
    apply(config, SettingChange::TorchBrightness(args.value), |d| d.torch())
}

pub fn run_gain(args: GainArgs, config: &PartsConfig) -> Result<()> {
    match args.target {
        GainTarget::Speaker => apply(config, SettingChange::SpeakerGain(args.value), |d| {
            d.speaker_gain()
        }),
        GainTarget::Earpiece => apply(config, SettingChange::EarpieceGain(args.value), |d| {
            d.earpiece_gain()
        }),
    }
}

fn apply(
    config: &PartsConfig,
    change: SettingChange,
    setting: impl Fn(&DeviceSettings) -> &SysfsSetting,
) -> Result<()> {
    let mut device = open_device(config)?;
    let value = change.value_text();

    if config.dry_run {
        let target = setting(&device);
        Output::dry_run(format!("Would write {value} to {}", target.path.display()));
        if !target.enabled {
            Output::warning(format!("{} is not writable", target.path.display()));
        }
        return Ok(());
    }

    device
        .change(change)
        .with_context(|| format!("Failed to set {}", change.key()))?;
    Output::success(format!("{} set to {value}", change.key()));
    Ok(())
}
