//! Status command implementation.
//!
//! Shows every setting, its live value and whether it can be changed.

use anyhow::Result;
use clap::Args;

use crate::commands::{Format, open_device};
use crate::config::PartsConfig;
use crate::output::{self, Output};
use crate::selinux::mode_name;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

pub fn run(args: StatusArgs, config: &PartsConfig) -> Result<()> {
    let device = open_device(config)?;
    let status = device.status();

    if args.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    Output::header("Device settings");
    Output::kv(
        "Root",
        if status.rooted { "available" } else { "unavailable" },
    );
    Output::kv(
        "SELinux",
        format!(
            "{} {}",
            mode_name(status.selinux.live_value),
            output::switch(status.selinux.live_value, status.selinux.enabled)
        ),
    );
    Output::kv(
        "  persist",
        output::switch(status.selinux.persist, status.selinux.enabled),
    );

    for setting in &status.sysfs {
        let value = setting.value.as_deref().unwrap_or("-");
        if setting.enabled {
            Output::kv(setting.key, value);
        } else {
            Output::kv(setting.key, format!("{value} (unavailable)"));
        }
    }

    Output::blank();
    Output::note(&status.explanation);
    Ok(())
}
