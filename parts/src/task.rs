//! Background execution of privileged commands.
//!
//! The interactive thread owns a [`TaskRunner`]. [`TaskRunner::submit`] queues
//! a command for the worker pool and returns immediately; finished tasks come
//! back as [`Completion`]s on a channel that only the interactive thread
//! reads. Every outcome, including panics inside a worker, is delivered as an
//! [`ExecutionResult`] rather than an error.
//!
//! There is no cancellation and no coalescing. With one worker (the default),
//! completions arrive in submission order.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::PrivilegeError;
use crate::su::{CommandOutput, PrivilegedCommand, SuBroker};

/// Outcome of one privileged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Combined output, when the command got far enough to produce any.
    pub output: Option<String>,
    pub error: Option<PrivilegeError>,
}

impl ExecutionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: PrivilegeError) -> Self {
        let output = match &error {
            PrivilegeError::CommandFailed { output, .. } => Some(output.clone()),
            _ => None,
        };
        Self {
            success: false,
            output,
            error: Some(error),
        }
    }

    /// Human-readable failure text including any output, if failed.
    pub fn error_text(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        Some(match self.output.as_deref().filter(|o| !o.is_empty()) {
            Some(output) => format!("{error}: {output}"),
            None => error.to_string(),
        })
    }
}

impl From<Result<CommandOutput, PrivilegeError>> for ExecutionResult {
    fn from(result: Result<CommandOutput, PrivilegeError>) -> Self {
        match result {
            Ok(out) => Self::ok(out.output),
            Err(e) => Self::failed(e),
        }
    }
}

/// Identifies a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Job<P> {
    id: TaskId,
    key: String,
    command: PrivilegedCommand,
    param: P,
}

/// A finished task, handed back with the caller's parameter.
#[derive(Debug)]
pub struct Completion<P> {
    pub id: TaskId,
    pub key: String,
    pub param: P,
    pub result: ExecutionResult,
}

/// Worker pool plus result channel. Not `Sync`: it belongs to one thread.
pub struct TaskRunner<P> {
    jobs: Option<Sender<Job<P>>>,
    completions: Receiver<Completion<P>>,
    workers: Vec<JoinHandle<()>>,
    next_id: u64,
    outstanding: usize,
}

impl<P: Send + 'static> TaskRunner<P> {
    /// Start `workers` background threads (at least one) sharing `broker`.
    pub fn new(broker: Arc<SuBroker>, workers: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job<P>>();
        let (done_tx, done_rx) = mpsc::channel::<Completion<P>>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..workers.max(1))
            .filter_map(|n| {
                let broker = broker.clone();
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("parts-worker-{n}"))
                    .spawn(move || worker_loop(&broker, &job_rx, &done_tx))
                    .inspect_err(|e| error!(error = %e, "Failed to start worker thread"))
                    .ok()
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
            next_id: 0,
            outstanding: 0,
        }
    }

    /// Queue `command` for `key`. The result comes back through
    /// [`try_next`](Self::try_next) or [`next_timeout`](Self::next_timeout).
    pub fn submit(
        &mut self,
        key: impl Into<String>,
        command: PrivilegedCommand,
        param: P,
    ) -> Result<TaskId, PrivilegeError> {
        let Some(jobs) = self.jobs.as_ref().filter(|_| !self.workers.is_empty()) else {
            return Err(PrivilegeError::denied("no background workers available"));
        };

        self.next_id += 1;
        let id = TaskId(self.next_id);
        let key = key.into();
        debug!(task = %id, key = %key, %command, "Submitting privileged task");

        jobs.send(Job {
            id,
            key,
            command,
            param,
        })
        .map_err(|_| PrivilegeError::denied("background workers have stopped"))?;
        self.outstanding += 1;
        Ok(id)
    }

    /// Tasks submitted but not yet handed back.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Total number of tasks ever submitted.
    pub fn submitted(&self) -> u64 {
        self.next_id
    }

    /// A finished task, if one is ready. Never blocks.
    pub fn try_next(&mut self) -> Option<Completion<P>> {
        match self.completions.try_recv() {
            Ok(done) => Some(self.delivered(done)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.workers_gone(),
        }
    }

    /// Wait up to `timeout` for a finished task.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Completion<P>> {
        if self.outstanding == 0 {
            return None;
        }
        match self.completions.recv_timeout(timeout) {
            Ok(done) => Some(self.delivered(done)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.workers_gone(),
        }
    }

    /// Stop accepting work and wait for queued tasks to finish.
    pub fn shutdown(mut self) -> Vec<Completion<P>> {
        self.stop();
        self.completions.try_iter().collect()
    }

    fn delivered(&mut self, done: Completion<P>) -> Completion<P> {
        self.outstanding = self.outstanding.saturating_sub(1);
        debug!(task = %done.id, key = %done.key, success = done.result.success, "Task completed");
        done
    }

    /// Every worker has exited; nothing outstanding will ever come back.
    fn workers_gone(&mut self) -> Option<Completion<P>> {
        if self.outstanding > 0 {
            error!(lost = self.outstanding, "Background workers exited with tasks outstanding");
            self.outstanding = 0;
        }
        None
    }

    fn stop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl<P> Drop for TaskRunner<P> {
    fn drop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop<P>(
    broker: &SuBroker,
    jobs: &Mutex<Receiver<Job<P>>>,
    done: &Sender<Completion<P>>,
) {
    loop {
        // Hold the queue lock only while taking a job.
        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = next else {
            break;
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(|| broker.execute(&job.command))) {
            Ok(result) => ExecutionResult::from(result),
            Err(_) => {
                error!(task = %job.id, command = %job.command, "Privileged task panicked");
                ExecutionResult::failed(PrivilegeError::SessionLost {
                    command: job.command.to_string(),
                })
            }
        };

        let completion = Completion {
            id: job.id,
            key: job.key,
            param: job.param,
            result,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::su::ShellLauncher;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(10);

    fn sh_broker() -> Arc<SuBroker> {
        Arc::new(SuBroker::with_probe(
            ShellLauncher::new("sh"),
            || true,
            Duration::from_secs(5),
        ))
    }

    fn cmd(line: &str) -> PrivilegedCommand {
        PrivilegedCommand::new(line).unwrap()
    }

    #[test]
    fn test_submit_does_not_block() {
        let mut runner = TaskRunner::new(sh_broker(), 1);
        let start = Instant::now();
        runner.submit("slow", cmd("sleep 0.5"), ()).unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(runner.outstanding(), 1);

        let done = runner.next_timeout(WAIT).unwrap();
        assert!(done.result.success);
        assert_eq!(runner.outstanding(), 0);
    }

    #[test]
    fn test_param_and_key_round_trip() {
        let mut runner = TaskRunner::new(sh_broker(), 1);
        let id = runner.submit("selinux_mode", cmd("echo applied"), true).unwrap();

        let done = runner.next_timeout(WAIT).unwrap();
        assert_eq!(done.id, id);
        assert_eq!(done.key, "selinux_mode");
        assert!(done.param);
        assert_eq!(done.result, ExecutionResult::ok("applied"));
    }

    #[test]
    fn test_failure_is_a_result() {
        let mut runner = TaskRunner::new(sh_broker(), 1);
        runner.submit("k", cmd("echo nope >&2; exit 4"), ()).unwrap();
        let done = runner.next_timeout(WAIT).unwrap();
        assert!(!done.result.success);
        assert!(matches!(
            done.result.error,
            Some(PrivilegeError::SessionLost { .. })
        ));

        runner.submit("k", cmd("echo nope; false"), ()).unwrap();
        let done = runner.next_timeout(WAIT).unwrap();
        assert!(!done.result.success);
        assert_eq!(done.result.output.as_deref(), Some("nope"));
        assert!(done.result.error_text().unwrap().contains("status 1"));
    }

    #[test]
    fn test_single_worker_preserves_order() {
        let mut runner = TaskRunner::new(sh_broker(), 1);
        let ids: Vec<_> = (0..5)
            .map(|i| runner.submit("k", cmd(&format!("echo {i}")), i).unwrap())
            .collect();

        let got: Vec<_> = (0..5)
            .map(|_| runner.next_timeout(WAIT).unwrap())
            .map(|c| (c.id, c.param))
            .collect();
        let expected: Vec<_> = ids.into_iter().zip(0..5).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_pool_shares_one_session() {
        let broker = sh_broker();
        let mut runner = TaskRunner::new(broker.clone(), 4);
        for i in 0..8 {
            runner.submit(format!("k{i}"), cmd("sleep 0.02; echo $$"), ()).unwrap();
        }

        let pids: std::collections::HashSet<_> = (0..8)
            .map(|_| runner.next_timeout(WAIT).unwrap())
            .map(|c| c.result.output.unwrap())
            .collect();
        assert_eq!(pids.len(), 1);
        assert_eq!(broker.sessions_opened(), 1);
    }

    #[test]
    fn test_unrooted_results_are_permission_denied() {
        let broker = Arc::new(SuBroker::with_probe(
            ShellLauncher::new("sh"),
            || false,
            Duration::from_secs(1),
        ));
        let mut runner = TaskRunner::new(broker.clone(), 1);
        runner.submit("k", cmd("setenforce 1"), ()).unwrap();
        let done = runner.next_timeout(WAIT).unwrap();
        assert!(done.result.error.unwrap().is_permission_denied());
        assert_eq!(broker.commands_issued(), 0);
    }

    #[test]
    fn test_try_next_is_empty_without_work() {
        let mut runner: TaskRunner<()> = TaskRunner::new(sh_broker(), 1);
        assert!(runner.try_next().is_none());
        assert!(runner.next_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let mut runner = TaskRunner::new(sh_broker(), 1);
        runner.submit("a", cmd("true"), 1).unwrap();
        runner.submit("b", cmd("true"), 2).unwrap();
        let rest = runner.shutdown();
        assert_eq!(rest.iter().map(|c| c.param).collect::<Vec<_>>(), vec![1, 2]);
    }
}
