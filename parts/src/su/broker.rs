//! Root detection and ownership of the shared elevated session.

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::command::{CommandOutput, PrivilegedCommand};
use super::executor;
use super::session::{ElevatedSession, ShellLauncher, Teardown};
use crate::error::PrivilegeError;

/// Where root managers install `su` on Android devices.
pub const ANDROID_SU_PATHS: &[&str] = &[
    "/system/bin/su",
    "/system/xbin/su",
    "/sbin/su",
    "/su/bin/su",
    "/debug_ramdisk/su",
];

/// Decides whether elevated access can be obtained at all.
pub trait RootProbe: Send + Sync {
    fn is_rooted(&self) -> bool;
}

impl<F> RootProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_rooted(&self) -> bool {
        self()
    }
}

/// Treats the device as rooted when the `su` program can be found.
#[derive(Debug, Clone)]
pub struct SuBinaryProbe {
    program: PathBuf,
    search_path: Option<OsString>,
}

impl SuBinaryProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Override the `PATH` used for lookup.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Resolve the program to an executable file.
    pub fn locate(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return is_executable(&self.program).then(|| self.program.clone());
        }

        let from_path = self
            .search_path
            .as_ref()
            .into_iter()
            .flat_map(std::env::split_paths)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| is_executable(candidate));
        if from_path.is_some() {
            return from_path;
        }

        if self.program == Path::new("su") {
            return ANDROID_SU_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| is_executable(candidate));
        }

        None
    }
}

impl RootProbe for SuBinaryProbe {
    fn is_rooted(&self) -> bool {
        match self.locate() {
            Some(path) => {
                debug!(su = %path.display(), "Found su binary");
                true
            }
            None => {
                debug!(program = %self.program.display(), "No su binary found");
                false
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Owns the elevated session and serializes access to it.
///
/// The probe runs once; an unrooted device never spawns anything. The session
/// is created on first use and kept until it dies, times out, or [`close`] is
/// called.
///
/// [`close`]: SuBroker::close
pub struct SuBroker {
    launcher: ShellLauncher,
    probe: Box<dyn RootProbe>,
    rooted: OnceLock<bool>,
    timeout: Duration,
    gate: Mutex<Option<ElevatedSession>>,
    /// Process groups of shells that could not be stopped from here.
    orphans: Mutex<Vec<u32>>,
    sessions_opened: AtomicUsize,
    commands_issued: AtomicUsize,
}

impl SuBroker {
    /// A broker that probes for the launcher's program on disk.
    pub fn new(launcher: ShellLauncher, timeout: Duration) -> Self {
        let probe = SuBinaryProbe::new(launcher.program());
        Self::with_probe(launcher, probe, timeout)
    }

    pub fn with_probe(
        launcher: ShellLauncher,
        probe: impl RootProbe + 'static,
        timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            probe: Box::new(probe),
            rooted: OnceLock::new(),
            timeout,
            gate: Mutex::new(None),
            orphans: Mutex::new(Vec::new()),
            sessions_opened: AtomicUsize::new(0),
            commands_issued: AtomicUsize::new(0),
        }
    }

    /// Cached result of the root probe.
    pub fn is_rooted(&self) -> bool {
        *self.rooted.get_or_init(|| self.probe.is_rooted())
    }

    /// Number of shell processes started so far.
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of commands sent to a session so far (handshakes excluded).
    pub fn commands_issued(&self) -> usize {
        self.commands_issued.load(Ordering::SeqCst)
    }

    /// Take exclusive use of a live session, starting one if needed.
    ///
    /// Blocks while another caller holds the session.
    pub fn acquire(&self) -> Result<SessionGuard<'_>, PrivilegeError> {
        if !self.is_rooted() {
            return Err(PrivilegeError::denied(format!(
                "{} not found",
                self.launcher.program().display()
            )));
        }

        let mut slot = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let stale = slot.as_mut().is_some_and(|s| !s.is_alive());
        if stale && let Some(session) = slot.take() {
            debug!("Discarding dead elevated session");
            self.retire(session);
        }

        if slot.is_none() {
            *slot = Some(self.open_session()?);
        }

        Ok(SessionGuard {
            slot,
            broker: self,
        })
    }

    /// Run one command under the configured timeout.
    pub fn execute(&self, command: &PrivilegedCommand) -> Result<CommandOutput, PrivilegeError> {
        self.acquire()?.run(command)
    }

    /// Tear down the current session, if any. The next use opens a new one.
    pub fn close(&self) {
        let session = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            debug!(pid = session.pid(), "Closing elevated session");
            self.retire(session);
        }
    }

    /// Tear `session` down without waiting on a shell we cannot stop. Its
    /// process group is killed from the next session instead.
    fn retire(&self, session: ElevatedSession) {
        if let Teardown::Detached { pgid } = session.close() {
            self.orphans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(pgid);
        }
    }

    /// Kill leftover process groups from inside a fresh elevated shell.
    fn kill_orphans(&self, session: &mut ElevatedSession) {
        let pgids: Vec<u32> = self
            .orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for pgid in pgids {
            let line = format!("kill -KILL -- -{pgid} 2>/dev/null; true");
            match PrivilegedCommand::new(line)
                .and_then(|kill| executor::run(session, &kill, self.timeout))
            {
                Ok(_) => debug!(pgid, "Killed detached process group"),
                Err(e) => warn!(pgid, error = %e, "Failed to kill detached process group"),
            }
        }
    }

    fn open_session(&self) -> Result<ElevatedSession, PrivilegeError> {
        let mut session = ElevatedSession::spawn(&self.launcher)?;
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);

        // su exits straight away when the root manager refuses us.
        let handshake = PrivilegedCommand::new("true")?;
        match executor::run(&mut session, &handshake, self.timeout) {
            Ok(_) => {
                info!(pid = session.pid(), "Elevated session ready");
                self.kill_orphans(&mut session);
                Ok(session)
            }
            Err(e) => {
                warn!(shell = %self.launcher.describe(), error = %e, "Elevated shell rejected handshake");
                Err(PrivilegeError::denied(format!(
                    "{} refused: {e}",
                    self.launcher.describe()
                )))
            }
        }
    }
}

/// Exclusive access to the live session. Dropping it releases the gate.
pub struct SessionGuard<'a> {
    slot: MutexGuard<'a, Option<ElevatedSession>>,
    broker: &'a SuBroker,
}

impl SessionGuard<'_> {
    /// Run a command. A session lost or timed out here is torn down.
    pub fn run(&mut self, command: &PrivilegedCommand) -> Result<CommandOutput, PrivilegeError> {
        let Some(session) = self.slot.as_mut() else {
            return Err(PrivilegeError::SessionLost {
                command: command.to_string(),
            });
        };

        self.broker.commands_issued.fetch_add(1, Ordering::SeqCst);
        let result = executor::run(session, command, self.broker.timeout);

        if let Err(e) = &result
            && e.invalidates_session()
        {
            warn!(error = %e, "Dropping elevated session");
            if let Some(session) = self.slot.take() {
                self.broker.retire(session);
            }
        }
        result
    }
}
