//! Doctor command implementation.
//!
//! Runs readiness checks for root access and the kernel attributes the
//! settings depend on.

use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use nix::unistd::Uid;
use parts_common::sysfs;
use serde::Serialize;

use crate::commands::{Format, broker};
use crate::config::PartsConfig;
use crate::device::{enforce_path, sysfs_paths};
use crate::output::Output;
use crate::su::{PrivilegedCommand, SuBinaryProbe};

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

fn pass(name: &str, message: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed: true,
        message: message.into(),
        fix_hint: None,
    }
}

fn fail(name: &str, message: impl Into<String>, fix_hint: &str) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed: false,
        message: message.into(),
        fix_hint: (!fix_hint.trim().is_empty()).then(|| fix_hint.to_string()),
    }
}

pub fn run(args: DoctorArgs, config: &PartsConfig) -> Result<()> {
    let mut results = vec![check_su_binary(config)];
    if !config.dry_run {
        results.push(check_elevated_shell(config));
    }
    results.push(check_enforce_readable(&enforce_path(config)));
    results.push(check_state_dir(&config.state_dir));
    results.extend(
        sysfs_paths(&config.sysfs_root)
            .iter()
            .map(|(key, path)| check_attribute(key, path)),
    );

    if args.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    Output::header("parts doctor - checking device readiness");

    let mut all_passed = true;
    for result in &results {
        if result.passed {
            Output::success(format!("{}: {}", result.name, result.message));
        } else {
            Output::error(format!("{}: {}", result.name, result.message));
            if let Some(hint) = &result.fix_hint {
                Output::hint(hint);
            }
            all_passed = false;
        }
    }

    Output::blank();
    if all_passed {
        Output::success("All checks passed.");
    } else {
        Output::warning("Some checks failed; the matching settings will be disabled.");
    }
    Ok(())
}

fn check_su_binary(config: &PartsConfig) -> CheckResult {
    match SuBinaryProbe::new(&config.su).locate() {
        Some(path) if Uid::effective().is_root() => {
            pass("su binary", format!("{} (running as uid 0)", path.display()))
        }
        Some(path) => pass("su binary", path.display().to_string()),
        None => fail(
            "su binary",
            format!("{} not found", config.su.display()),
            "Install a root manager, or point PARTS_SU at its su binary",
        ),
    }
}

fn check_elevated_shell(config: &PartsConfig) -> CheckResult {
    let broker = broker(config);
    let probe = PrivilegedCommand::new("id -u").and_then(|cmd| broker.execute(&cmd));
    match probe {
        Ok(out) if out.output.trim() == "0" => pass("elevated shell", "commands run as root"),
        Ok(out) => fail(
            "elevated shell",
            format!("commands run as uid {}", out.output.trim()),
            "The configured shell does not grant root",
        ),
        Err(e) => fail(
            "elevated shell",
            e.to_string(),
            "Grant root to this program in the root manager",
        ),
    }
}

fn check_enforce_readable(path: &Path) -> CheckResult {
    match sysfs::read_bool(path) {
        Ok(enforcing) => pass(
            "selinux",
            if enforcing { "enforcing" } else { "permissive" },
        ),
        Err(e) => fail("selinux", format!("{}: {e}", path.display()), ""),
    }
}

fn check_state_dir(dir: &Path) -> CheckResult {
    let probe = dir.join(".parts-doctor");
    let writable = fs::create_dir_all(dir)
        .and_then(|()| fs::write(&probe, b""))
        .and_then(|()| fs::remove_file(&probe));
    match writable {
        Ok(()) => pass("state dir", dir.display().to_string()),
        Err(e) => fail(
            "state dir",
            format!("{}: {e}", dir.display()),
            "Set PARTS_STATE_DIR to a writable directory",
        ),
    }
}

fn check_attribute(key: &str, path: &Path) -> CheckResult {
    if sysfs::is_writable(path) {
        pass(key, path.display().to_string())
    } else {
        fail(key, format!("{} is not writable", path.display()), "")
    }
}
