//! Privileged command execution through a long-lived root shell.
//!
//! The [`SuBroker`] owns at most one [`ElevatedSession`]: a `su` process whose
//! stdin/stdout are piped to us. Commands are written to the shell one at a
//! time and their end is detected by a per-command marker line carrying the
//! exit status.
//!
//! # Architecture
//!
//! ```text
//! worker thread                 SuBroker                    su (root shell)
//! ┌─────────────┐  acquire() ┌──────────────┐  stdin   ┌──────────────────┐
//! │ TaskRunner  │───────────►│ Mutex<Option │─────────►│ { cmd } 2>&1     │
//! │   worker    │◄───────────│ <Session>>   │◄─────────│ echo "MARK $?"   │
//! └─────────────┘   result   └──────────────┘  stdout  └──────────────────┘
//! ```
//!
//! The mutex is the gate: whoever holds a [`SessionGuard`] is the only one
//! talking to the shell. A session that dies or times out is dropped, and the
//! next [`SuBroker::acquire`] spawns a fresh one.

mod broker;
mod command;
pub mod executor;
mod session;

pub use broker::{ANDROID_SU_PATHS, RootProbe, SessionGuard, SuBinaryProbe, SuBroker};
pub use command::{CommandOutput, PrivilegedCommand};
pub use session::{ElevatedSession, ShellLauncher, Teardown};

use std::time::Duration;

/// Default bound on how long a single privileged command may take.
///
/// `setenforce` and sysfs writes complete in milliseconds; the bound mostly
/// covers the root manager's first-use prompt during the handshake.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
