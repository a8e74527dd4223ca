use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};

use super::toolchain::ResolvedCommand;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const TRUNCATION_SENTINEL: &str = "\n... [output truncated]";

// Resource limits applied to every child
const FILE_SIZE_LIMIT: u64 = 64 * 1024 * 1024; // bytes
const READ_CHUNK: usize = 8192;
// How long to wait for pipes to drain once the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum RunFault {
    #[error("process did not finish within {} seconds", .limit.as_secs())]
    TimedOut { limit: Duration },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to supervise process: {0}")]
    Wait(#[source] io::Error),
}

/// What a finished process left behind
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Exit code, or 128 + signal number when killed by a signal
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        to_text(&self.stdout, self.stdout_truncated)
    }

    pub fn stderr_text(&self) -> String {
        to_text(&self.stderr, self.stderr_truncated)
    }

    /// Captured stderr, or the exit code when stderr is blank. Never empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr_text();
        if stderr.trim().is_empty() {
            format!("Process exited with code {}", self.exit_code)
        } else {
            stderr
        }
    }
}

fn to_text(bytes: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_SENTINEL);
    }
    text
}

/// Spawns one child at a time under a wall-clock ceiling
///
/// The child runs in its own process group so that anything it forks is killed
/// with it. Output is captured in memory up to `max_output_bytes` per stream.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub async fn run(
        &self,
        command: &ResolvedCommand,
        working_dir: &Path,
        stdin: Option<Vec<u8>>,
        time_limit: Duration,
    ) -> Result<ProcessOutput, RunFault> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let cpu_limit = time_limit.as_secs().saturating_mul(2).saturating_add(1);
        // SAFETY: apply_rlimits only calls async-signal-safe setrlimit
        unsafe {
            cmd.pre_exec(move || apply_rlimits(cpu_limit));
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunFault::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let Some(pid) = child.id().map(|pid| pid as libc::pid_t) else {
            return Err(RunFault::Wait(io::Error::other("child exited before supervision")));
        };
        // With process_group(0) the group id equals the child's pid
        let mut group = ProcessGroup(Some(pid));
        log::debug!("Spawned `{}` as pid {pid}", command.program);

        let cap = self.max_output_bytes;
        let stdout = child.stdout.take().map(|r| StreamCapture::spawn(r, cap));
        let stderr = child.stderr.take().map(|r| StreamCapture::spawn(r, cap));

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                // A child that exits without reading closes the pipe; that is not an error
                if let Err(e) = pipe.write_all(&data).await {
                    log::debug!("Stopped writing stdin: {e}");
                }
                let _ = pipe.shutdown().await;
            });
        }

        match timeout(time_limit, wait_exited(pid)).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                // The leader is not reaped yet, so its group id cannot have been reused
                group.kill();
                let status = match child.wait().await {
                    Ok(status) => status,
                    Err(e) => {
                        abort(stdout, stderr);
                        return Err(RunFault::Wait(e));
                    }
                };

                let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
                let (stdout, stdout_truncated) = collect(stdout, deadline).await;
                let (stderr, stderr_truncated) = collect(stderr, deadline).await;
                let exit_code = status
                    .code()
                    .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));

                Ok(ProcessOutput {
                    stdout,
                    stderr,
                    stdout_truncated,
                    stderr_truncated,
                    exit_code,
                    elapsed,
                })
            }
            Ok(Err(e)) => {
                group.kill();
                abort(stdout, stderr);
                Err(RunFault::Wait(e))
            }
            Err(_) => {
                log::info!(
                    "`{}` exceeded {:?}, killing process group",
                    command.program,
                    time_limit
                );
                group.kill();
                // Reap the direct child so no zombie is left behind
                if let Err(e) = child.kill().await {
                    log::debug!("Child already gone after group kill: {e}");
                }
                abort(stdout, stderr);
                Err(RunFault::TimedOut { limit: time_limit })
            }
        }
    }
}

/// Blocks until `pid` has exited, leaving it unreaped.
///
/// A zombie leader keeps its pid, and with it the process group id, reserved.
async fn wait_exited(pid: libc::pid_t) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    })
    .await
    .map_err(io::Error::other)?
}

/// SIGKILLs a process group at most once, on demand or when dropped
struct ProcessGroup(Option<libc::pid_t>);

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pgid) = self.0.take() {
            // ESRCH just means every member has already exited
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn apply_rlimits(cpu_seconds: u64) -> io::Result<()> {
    let limits = [
        (libc::RLIMIT_CORE, 0),
        (libc::RLIMIT_FSIZE, FILE_SIZE_LIMIT),
        (libc::RLIMIT_CPU, cpu_seconds),
    ];

    for (resource, value) in limits {
        let limit = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// One output stream being read in the background.
///
/// Bytes land in a shared buffer as they arrive, so whatever was read survives
/// even when the reader has to be abandoned.
struct StreamCapture {
    captured: Arc<Mutex<Captured>>,
    task: JoinHandle<io::Result<()>>,
}

impl StreamCapture {
    fn spawn<R: AsyncRead + Unpin + Send + 'static>(reader: R, cap: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_capped(reader, cap, captured.clone()));
        Self { captured, task }
    }

    fn take(&self) -> (Vec<u8>, bool) {
        let mut captured = self.captured.lock();
        (std::mem::take(&mut captured.bytes), captured.truncated)
    }
}

/// Reads a stream to its end, keeping at most `cap` bytes.
///
/// Reading continues past the cap so a chatty child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
    captured: Arc<Mutex<Captured>>,
) -> io::Result<()> {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let mut buf = captured.lock();
        let room = cap.saturating_sub(buf.bytes.len());
        if n > room {
            buf.bytes.extend_from_slice(&chunk[..room]);
            buf.truncated = true;
        } else {
            buf.bytes.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn collect(
    stream: Option<StreamCapture>,
    deadline: tokio::time::Instant,
) -> (Vec<u8>, bool) {
    let Some(mut stream) = stream else {
        return (Vec::new(), false);
    };

    match timeout_at(deadline, &mut stream.task).await {
        Ok(Ok(Ok(()))) => stream.take(),
        Ok(Ok(Err(e))) => {
            log::warn!("Failed to read child output: {e}");
            stream.take()
        }
        Ok(Err(e)) => {
            log::warn!("Output reader task failed: {e}");
            stream.take()
        }
        Err(_) => {
            // Something outside the group still holds the pipe open
            log::warn!("Child output pipe still open after exit, keeping what was read");
            stream.task.abort();
            let (bytes, _) = stream.take();
            (bytes, true)
        }
    }
}

fn abort(stdout: Option<StreamCapture>, stderr: Option<StreamCapture>) {
    for stream in [stdout, stderr].into_iter().flatten() {
        stream.task.abort();
    }
}
