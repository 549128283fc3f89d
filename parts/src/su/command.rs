//! Privileged command lines.

use std::fmt;

use crate::error::PrivilegeError;

/// A single shell command line to run in the elevated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedCommand {
    line: String,
}

impl PrivilegedCommand {
    /// Wrap a raw command line. Empty (or whitespace-only) lines are rejected.
    pub fn new(line: impl Into<String>) -> Result<Self, PrivilegeError> {
        let line = line.into();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(PrivilegeError::InvalidCommand {
                reason: "empty command".to_string(),
            });
        }
        if trimmed.contains('\0') {
            return Err(PrivilegeError::InvalidCommand {
                reason: "command contains a NUL byte".to_string(),
            });
        }
        Ok(Self {
            line: trimmed.to_string(),
        })
    }

    /// Build a command from a program and arguments, quoting each word.
    pub fn with_args<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Self, PrivilegeError> {
        let words = std::iter::once(program).chain(args.iter().map(|a| a.as_ref()));
        let line = shlex::try_join(words).map_err(|e| PrivilegeError::InvalidCommand {
            reason: e.to_string(),
        })?;
        Self::new(line)
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for PrivilegedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Output of a command that exited with status zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr.
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        assert!(PrivilegedCommand::new("").is_err());
        assert!(PrivilegedCommand::new("   \n").is_err());
    }

    #[test]
    fn test_trims_line() {
        let cmd = PrivilegedCommand::new("  setenforce 1\n").unwrap();
        assert_eq!(cmd.line(), "setenforce 1");
        assert_eq!(cmd.to_string(), "setenforce 1");
    }

    #[test]
    fn test_with_args_quotes() {
        let cmd = PrivilegedCommand::with_args(
            "echo",
            &["100", "/sys/class/leds/led:torch_1/max brightness"],
        )
        .unwrap();
        assert_eq!(
            shlex::split(cmd.line()).unwrap(),
            vec!["echo", "100", "/sys/class/leds/led:torch_1/max brightness"]
        );
    }

    #[test]
    fn test_with_args_rejects_nul() {
        let err = PrivilegedCommand::with_args("echo", &["a\0b"]).unwrap_err();
        assert!(matches!(err, PrivilegeError::InvalidCommand { .. }));
    }
}
