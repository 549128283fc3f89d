//! The elevated shell process.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use crate::error::PrivilegeError;

/// How long teardown waits for the shell after each escalation step.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// How to start the elevated shell.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    /// Act as if every signal is refused, like a root shell seen from an
    /// unprivileged caller.
    #[cfg(test)]
    unsignalable: bool,
}

impl ShellLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            #[cfg(test)]
            unsignalable: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn unsignalable(mut self) -> Self {
        self.unsignalable = true;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn describe(&self) -> String {
        let mut words = vec![self.program.display().to_string()];
        words.extend(self.args.iter().cloned());
        words.join(" ")
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The shell exited and was reaped.
    Reaped,
    /// The shell could not be stopped; a background thread reaps it once it
    /// exits. `pgid` names its process group.
    Detached { pgid: u32 },
}

/// A running shell with piped stdin/stdout.
///
/// stdout is drained by a reader thread into a channel so that waiting for
/// output can be bounded with a timeout.
pub struct ElevatedSession {
    /// `None` once torn down.
    child: Option<Child>,
    pid: u32,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    alive: bool,
    seq: u64,
    #[cfg(test)]
    unsignalable: bool,
}

impl ElevatedSession {
    /// Start the shell. Failing to start it at all means root is unavailable.
    pub fn spawn(launcher: &ShellLauncher) -> Result<Self, PrivilegeError> {
        let mut cmd = Command::new(&launcher.program);
        cmd.args(&launcher.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Own process group, so teardown also reaches hung commands.
            .process_group(0);
        for (k, v) in &launcher.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            PrivilegeError::denied(format!("failed to start {}: {e}", launcher.describe()))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PrivilegeError::denied("shell started without pipes"));
        };

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("su-reader-{}", child.id()))
            .spawn(move || read_lines(stdout, tx));
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PrivilegeError::denied(format!(
                "failed to start output reader: {e}"
            )));
        }

        debug!(pid = child.id(), shell = %launcher.describe(), "Spawned elevated shell");

        Ok(Self {
            pid: child.id(),
            child: Some(child),
            stdin: Some(stdin),
            lines: rx,
            alive: true,
            seq: 0,
            #[cfg(test)]
            unsignalable: launcher.unsignalable,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the shell is still running and has not been marked dead.
    pub fn is_alive(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            self.alive = false;
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = self.pid(), %status, "Elevated shell exited");
                self.alive = false;
                false
            }
            Err(e) => {
                debug!(pid = self.pid(), error = %e, "Failed to poll elevated shell");
                self.alive = false;
                false
            }
        }
    }

    pub(crate) fn mark_dead(&mut self) {
        self.alive = false;
    }

    /// A marker no command output will contain by accident.
    pub(crate) fn next_marker(&mut self) -> String {
        self.seq += 1;
        format!("__PARTS_{}_{}__", self.pid(), self.seq)
    }

    pub(crate) fn send(&mut self, script: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(script.as_bytes())?;
        stdin.flush()
    }

    pub(crate) fn recv_line(&self, deadline: Instant) -> Result<String, RecvTimeoutError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.lines.recv_timeout(remaining)
    }

    /// Terminate the shell.
    ///
    /// Never blocks longer than a few grace periods: a shell that ignores
    /// EOF and cannot be signalled is left to a reaper thread.
    pub fn close(mut self) -> Teardown {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Teardown {
        self.alive = false;
        let Some(mut child) = self.child.take() else {
            return Teardown::Reaped;
        };

        // EOF on stdin lets a healthy shell exit on its own.
        drop(self.stdin.take());
        if wait_for_exit(&mut child, SHUTDOWN_GRACE) {
            return Teardown::Reaped;
        }

        let pid = Pid::from_raw(self.pid as i32);
        if self.signal_group(pid, Signal::SIGTERM) && wait_for_exit(&mut child, SHUTDOWN_GRACE) {
            // The shell is reaped; only stragglers in its group remain.
            let _ = signal::killpg(pid, Signal::SIGKILL);
            return Teardown::Reaped;
        }

        debug!(pid = self.pid, "Killing unresponsive elevated shell");
        if self.signal_group(pid, Signal::SIGKILL) && wait_for_exit(&mut child, SHUTDOWN_GRACE) {
            return Teardown::Reaped;
        }

        warn!(pid = self.pid, "Elevated shell cannot be stopped; reaping it in the background");
        let reaper = thread::Builder::new()
            .name(format!("su-reaper-{}", self.pid))
            .spawn(move || {
                let status = child.wait();
                trace!(?status, "Detached elevated shell exited");
            });
        if let Err(e) = reaper {
            warn!(pid = self.pid, error = %e, "Failed to start reaper thread");
        }
        Teardown::Detached { pgid: self.pid }
    }

    /// Signal the shell's process group, or just the shell if that fails
    /// (a root-owned group cannot be signalled by an unprivileged caller).
    /// Returns whether either signal was delivered.
    fn signal_group(&self, pid: Pid, sig: Signal) -> bool {
        #[cfg(test)]
        if self.unsignalable {
            return false;
        }

        match signal::killpg(pid, sig) {
            Ok(()) => true,
            Err(e) => {
                trace!(pid = self.pid, ?sig, error = %e, "Signalling process group failed");
                signal::kill(pid, sig)
                    .inspect_err(|e| {
                        trace!(pid = self.pid, ?sig, error = %e, "Signalling shell failed")
                    })
                    .is_ok()
            }
        }
    }
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return true,
            Ok(None) if Instant::now() >= deadline => return false,
            Ok(None) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

impl Drop for ElevatedSession {
    fn drop(&mut self) {
        if self.child.is_some() {
            let teardown = self.shutdown();
            debug!(pid = self.pid, ?teardown, "Elevated shell closed");
        }
    }
}

/// Forward stdout line by line until EOF or until the session is dropped.
fn read_lines(stdout: ChildStdout, tx: Sender<String>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!(error = %e, "Elevated shell stdout closed with error");
                break;
            }
        }
    }
}
