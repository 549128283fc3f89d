//! Error types for privileged execution.

use std::time::Duration;
use thiserror::Error;

/// Every way a privileged command can fail.
///
/// All variants are plain data so that a failure can be carried inside an
/// [`ExecutionResult`](crate::task::ExecutionResult) across threads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeError {
    #[error("root access unavailable: {reason}")]
    PermissionDenied { reason: String },

    #[error("`{command}` exited with status {code}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("elevated session died while running `{command}`")]
    SessionLost { command: String },

    #[error("`{command}` did not finish within {}ms", timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
}

impl PrivilegeError {
    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        PrivilegeError::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Whether the session that produced this error can no longer be used.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            PrivilegeError::SessionLost { .. } | PrivilegeError::Timeout { .. }
        )
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PrivilegeError::PermissionDenied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_invalidation() {
        let lost = PrivilegeError::SessionLost {
            command: "setenforce 1".into(),
        };
        let timeout = PrivilegeError::Timeout {
            command: "setenforce 1".into(),
            timeout: Duration::from_millis(250),
        };
        let failed = PrivilegeError::CommandFailed {
            command: "setenforce 1".into(),
            code: 1,
            output: String::new(),
        };

        assert!(lost.invalidates_session());
        assert!(timeout.invalidates_session());
        assert!(!failed.invalidates_session());
        assert!(!PrivilegeError::denied("no su").invalidates_session());
    }

    #[test]
    fn test_messages() {
        let timeout = PrivilegeError::Timeout {
            command: "sleep 5".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(timeout.to_string(), "`sleep 5` did not finish within 250ms");
        assert_eq!(
            PrivilegeError::denied("su not found").to_string(),
            "root access unavailable: su not found"
        );
    }
}
