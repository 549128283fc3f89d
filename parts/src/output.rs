//! Output helpers for consistent CLI output.
//!
//! Status lines carry a colored prefix; a spinner runs while a privileged
//! change is waiting on the elevated shell.
//!
//! ```rust,ignore
//! use parts::output::Output;
//!
//! Output::success("SELinux is now enforcing");
//! Output::warning("Rolled back to permissive");
//!
//! let spinner = Output::spinner("Running setenforce 1...");
//! // ... wait for the worker ...
//! spinner.finish_clear();
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::borrow::Cow;
use std::time::Duration;

pub struct Output;

impl Output {
    /// `✓ Applied`
    pub fn success(msg: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// `✗ Failed`, on stderr.
    pub fn error(msg: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), msg.as_ref().red());
    }

    /// `⚠ Rolled back`
    pub fn warning(msg: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow(), msg.as_ref());
    }

    /// `→ Checking root access...`
    pub fn info(msg: impl AsRef<str>) {
        println!("{} {}", "→".cyan(), msg.as_ref().dimmed());
    }

    pub fn header(msg: impl AsRef<str>) {
        println!("\n{}\n", msg.as_ref().bold().cyan());
    }

    /// Aligned `key: value` line.
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {:<18} {}", format!("{}:", key.as_ref()).cyan(), value.as_ref());
    }

    /// Indented suggestion under a failed check.
    pub fn hint(msg: impl AsRef<str>) {
        println!("  {} {}", "→".cyan(), msg.as_ref());
    }

    /// `[dry-run] Would run: setenforce 1`
    pub fn dry_run(msg: impl AsRef<str>) {
        println!("{} {}", "[dry-run]".dimmed(), msg.as_ref().dimmed());
    }

    /// Wrapped explanatory paragraph.
    pub fn note(msg: impl AsRef<str>) {
        for line in msg.as_ref().lines() {
            println!("  {}", line.dimmed());
        }
    }

    pub fn blank() {
        println!();
    }

    /// A spinner that animates until one of the `finish_*` methods is called.
    pub fn spinner(msg: impl Into<Cow<'static, str>>) -> Spinner {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        pb.set_message(msg);
        pb.enable_steady_tick(Duration::from_millis(80));
        Spinner(pb)
    }
}

/// Created via [`Output::spinner`].
pub struct Spinner(ProgressBar);

impl Spinner {
    pub fn finish_error(self, msg: impl AsRef<str>) {
        self.0
            .finish_with_message(format!("{} {}", "✗".red().bold(), msg.as_ref()));
    }

    /// Finish and clear the line.
    pub fn finish_clear(self) {
        self.0.finish_and_clear();
    }
}

/// `on`/`off` with color, dimmed when the control is disabled.
pub fn switch(on: bool, enabled: bool) -> String {
    let text = if on { "on" } else { "off" };
    match (enabled, on) {
        (false, _) => format!("{} (disabled)", text.dimmed()),
        (true, true) => text.green().to_string(),
        (true, false) => text.yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_methods_dont_panic() {
        Output::success("test");
        Output::error("test");
        Output::warning("test");
        Output::info("test");
        Output::hint("test");
        Output::dry_run("test");
        Output::kv("key", "value");
        Output::note("one\ntwo");
        Output::blank();
    }

    #[test]
    fn test_spinner_lifecycle() {
        Output::spinner("Testing...").finish_error("Failed");
        Output::spinner("Testing...").finish_clear();
    }

    #[test]
    fn test_switch_marks_disabled() {
        assert!(switch(true, false).contains("(disabled)"));
        assert!(!switch(false, true).contains("(disabled)"));
    }
}
