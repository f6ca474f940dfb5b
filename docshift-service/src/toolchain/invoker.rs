//! Subprocess execution with a wall-clock timeout and captured output.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SpawnError;

/// Per-stream capture limit. Output past this point is read and discarded so
/// the child never blocks on a full pipe.
const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How a subprocess ended. Exactly one per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own with this code
    Exited(i32),
    /// Killed by a signal we did not send, or lost while waiting
    Terminated,
    /// Still running when the timeout fired; it has since been killed
    TimedOut,
}

/// Final record of one subprocess execution
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: ProcessOutcome,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ProcessOutcome::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            ProcessOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }
}

/// Runs external executables.
///
/// The child is placed in its own process group (unix) so that a timeout
/// takes down anything it spawned as well. Termination is SIGTERM to the
/// group, then SIGKILL once `grace` has passed. The group is also killed
/// after a normal exit, so background children never outlive the call.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    grace: Duration,
}

impl ProcessInvoker {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Run `program` to completion or until `timeout` elapses.
    ///
    /// Only a failure to start the process is an error; every other ending is
    /// reported through [`ProcessResult::outcome`].
    pub async fn run<I, S>(
        &self,
        program: &Path,
        args: I,
        timeout: Duration,
    ) -> Result<ProcessResult, SpawnError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let started = Instant::now();

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate(&mut command);

        let mut child = command.spawn().map_err(|source| SpawnError {
            program: program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        debug!(program = %program.display(), pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Spawned process");

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, Arc::clone(&stdout_buf))));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, Arc::clone(&stderr_buf))));

        let outcome = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => exit_outcome(status),
            Ok(Err(e)) => {
                warn!(program = %program.display(), error = %e, "Lost track of process, killing it");
                self.terminate(&mut child, pid).await;
                ProcessOutcome::Terminated
            }
            Err(_) => {
                warn!(program = %program.display(), pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Process timed out, terminating");
                self.terminate(&mut child, pid).await;
                ProcessOutcome::TimedOut
            }
        };

        // Anything the leader left behind in its group goes with it
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }

        // A grandchild can keep a pipe open after the leader is gone
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            finish_reader(task, self.grace).await;
        }

        let result = ProcessResult {
            outcome,
            stdout: take_text(&stdout_buf),
            stderr: take_text(&stderr_buf),
            elapsed: started.elapsed(),
        };

        debug!(
            program = %program.display(),
            outcome = ?result.outcome,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Process finished"
        );

        Ok(result)
    }

    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                signal_group(pid, nix::sys::signal::Signal::SIGTERM);
                let exited = tokio::time::timeout(self.grace, child.wait()).await.is_ok();
                if !exited {
                    debug!(pid, "Process ignored SIGTERM, killing");
                }
                // Sweep whatever is left of the group either way
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill after termination");
        }
        if let Err(e) = child.wait().await {
            warn!(error = %e, "Failed to reap terminated process");
        }
    }
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    command.process_group(0);
}

#[cfg(windows)]
fn isolate(command: &mut Command) {
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, signal = ?signal, error = %e, "Failed to signal process group"),
    }
}

fn exit_outcome(status: ExitStatus) -> ProcessOutcome {
    match status.code() {
        Some(code) => ProcessOutcome::Exited(code),
        None => ProcessOutcome::Terminated,
    }
}

async fn drain<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buf = lock(&sink);
                let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!(error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

async fn finish_reader(mut task: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        task.abort();
    }
}

fn take_text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = std::mem::take(&mut *lock(buf));
    String::from_utf8_lossy(&bytes).into_owned()
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
