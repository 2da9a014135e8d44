//! Subprocess spawning and supervision
//!
//! Runs one toolchain step to completion while watching for the deadline,
//! caller cancellation and the memory ceiling. Whatever ends the wait, the
//! child's whole process group is killed before output is collected.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::engine::ExecuteError;
use crate::engine::command::StepCommand;
use crate::engine::memory::MemorySampler;

/// Interval between memory samples
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for pipes to drain after the process group is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounds applied to a running step
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits<'a> {
    pub deadline: Instant,
    /// Total timeout the deadline was derived from, for error reporting
    pub timeout: Duration,
    /// Peak resident memory in bytes; zero disables the check
    pub max_memory: u64,
    pub cancel: &'a CancellationToken,
}

/// Captured outcome of a step that ran to exit
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub peak_memory: u64,
    /// When the process was spawned
    pub started: Instant,
}

impl ProcessOutput {
    /// stdout followed by stderr, as text
    pub fn combined(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        let mut combined = stdout.trim_end().to_string();
        if !combined.is_empty() && !stderr.trim().is_empty() {
            combined.push('\n');
        }
        combined.push_str(stderr.trim_end());
        combined
    }
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
    MemoryExceeded(u64),
}

/// Spawn `command` and wait for it within `limits`
#[instrument(skip(command, limits), fields(step = %command.step(), program = command.program()))]
pub(crate) async fn run(
    command: &StepCommand,
    limits: Limits<'_>,
) -> Result<ProcessOutput, ExecuteError> {
    if Instant::now() >= limits.deadline {
        return Err(ExecuteError::TimedOut(limits.timeout));
    }

    debug!(args = ?command.args(), "spawning");
    let mut child = command
        .build()?
        .spawn()
        .map_err(|source| ExecuteError::Spawn {
            step: command.step(),
            program: command.program().to_string(),
            source,
        })?;
    let started = Instant::now();
    let pgid = child.id();

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let mut sampler = MemorySampler::new(pgid);
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep_until(limits.deadline);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            status = child.wait() => break match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e),
            },
            () = &mut deadline => break Outcome::TimedOut,
            () = limits.cancel.cancelled() => break Outcome::Cancelled,
            _ = ticker.tick() => {
                let current = sampler.sample();
                if limits.max_memory > 0 && current > limits.max_memory {
                    break Outcome::MemoryExceeded(current);
                }
            }
        }
    };

    // Reap anything the step left behind in its group. After a normal exit the
    // leader is gone, so only signal a group that still has members.
    let exited = matches!(outcome, Outcome::Exited(_));
    if let Some(pgid) = pgid
        && (!exited || group_alive(pgid))
    {
        kill_group(pgid);
    }
    if !exited
        && let Err(e) = child.kill().await
    {
        debug!(error = %e, "kill after group signal failed");
    }

    let stdout = drain(stdout).await;
    let stderr = drain(stderr).await;

    match outcome {
        Outcome::Exited(status) => {
            let exit_code = exit_code(status);
            debug!(exit_code, peak_memory = sampler.peak(), "step exited");
            Ok(ProcessOutput {
                exit_code,
                stdout,
                stderr,
                peak_memory: sampler.peak(),
                started,
            })
        }
        Outcome::WaitFailed(e) => {
            warn!(error = %e, "failed to wait for step");
            Err(ExecuteError::Io(e))
        }
        Outcome::TimedOut => {
            warn!(timeout = ?limits.timeout, "step killed at deadline");
            Err(ExecuteError::TimedOut(limits.timeout))
        }
        Outcome::Cancelled => {
            debug!("step cancelled by caller");
            Err(ExecuteError::Cancelled)
        }
        Outcome::MemoryExceeded(used) => {
            warn!(used, limit = limits.max_memory, "step killed for memory");
            Err(ExecuteError::MemoryExceeded {
                used,
                limit: limits.max_memory,
            })
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<Vec<u8>>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).await?;
            Ok(buf)
        })
    })
}

/// Collect a reader's output, giving up if the pipe is still held open
async fn drain(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Vec<u8> {
    let Some(mut handle) = reader else {
        return Vec::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "failed to read process output");
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!("process output still open after kill, discarding");
            handle.abort();
            Vec::new()
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; ESRCH (group already
    // gone) is expected and ignored
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    // SAFETY: signal 0 only checks that some process in the group exists
    unsafe { libc::killpg(pgid, 0) == 0 }
}

#[cfg(not(unix))]
fn group_alive(_pgid: u32) -> bool {
    false
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
