//! Running one command inside an [`ElevatedSession`].
//!
//! Each command is sent as
//!
//! ```text
//! { <command>
//! } 2>&1 </dev/null
//! echo "__PARTS_<pid>_<seq>__ $?"
//! ```
//!
//! Everything read before the marker is the command's combined output; the
//! number after it is the exit status. The command's stdin is `/dev/null` so
//! it cannot swallow the lines that follow it on the session's stdin.

use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command::{CommandOutput, PrivilegedCommand};
use super::session::ElevatedSession;
use crate::error::PrivilegeError;

/// Run `command` and wait at most `timeout` for it to finish.
///
/// A lost session or a timeout marks the session dead; the caller must not
/// reuse it.
pub fn run(
    session: &mut ElevatedSession,
    command: &PrivilegedCommand,
    timeout: Duration,
) -> Result<CommandOutput, PrivilegeError> {
    let lost = || PrivilegeError::SessionLost {
        command: command.to_string(),
    };

    if !session.is_alive() {
        return Err(lost());
    }

    let marker = session.next_marker();
    let script = format!(
        "{{ {}\n}} 2>&1 </dev/null\necho \"{marker} $?\"\n",
        command.line()
    );

    debug!(pid = session.pid(), %command, "Running privileged command");

    if let Err(e) = session.send(&script) {
        debug!(pid = session.pid(), error = %e, "Failed to write to elevated shell");
        session.mark_dead();
        return Err(lost());
    }

    let deadline = Instant::now() + timeout;
    let mut output = String::new();

    loop {
        match session.recv_line(deadline) {
            Ok(line) => {
                let Some(idx) = line.find(&marker) else {
                    output.push_str(&line);
                    output.push('\n');
                    continue;
                };

                output.push_str(&line[..idx]);
                let code = parse_status(&line[idx + marker.len()..]);
                let output = output.trim_end_matches('\n').to_string();

                debug!(pid = session.pid(), %command, code, "Privileged command finished");

                return if code == 0 {
                    Ok(CommandOutput { output })
                } else {
                    Err(PrivilegeError::CommandFailed {
                        command: command.to_string(),
                        code,
                        output,
                    })
                };
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(pid = session.pid(), %command, ?timeout, "Privileged command timed out");
                session.mark_dead();
                return Err(PrivilegeError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(pid = session.pid(), %command, "Elevated shell closed its output");
                session.mark_dead();
                return Err(lost());
            }
        }
    }
}

/// Exit status written after the marker. Anything unparseable counts as failure.
fn parse_status(text: &str) -> i32 {
    text.trim().parse().unwrap_or(-1)
}
