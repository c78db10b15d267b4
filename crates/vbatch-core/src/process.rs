//! Process capability: start, wait-with-deadline, force-kill.
//!
//! The executor only talks to [`ProcessLauncher`] / [`RunningProcess`]; the
//! tokio-backed implementation lives here so no OS detail leaks into the
//! scheduler.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to keep draining output after the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Captured output kept per process; older bytes are dropped first.
pub const DEFAULT_OUTPUT_LIMIT: usize = 8 * 1024 * 1024;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Why `wait_until` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    DeadlineExceeded,
    Cancelled,
}

/// Starts processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn start(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn RunningProcess>>;
}

/// Handle to one started process.
#[async_trait]
pub trait RunningProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for exit, the deadline, or cancellation, whichever comes first.
    async fn wait_until(&mut self, deadline: Instant, cancel: &CancellationToken) -> WaitOutcome;

    /// Ask politely, wait `grace`, then kill. Returns once the process is reaped.
    async fn force_kill(&mut self, grace: Duration) -> std::io::Result<()>;

    /// Combined stdout/stderr captured so far. Call after the process is gone.
    async fn take_output(&mut self) -> String;
}

/// Launches real OS processes through `tokio::process`.
///
/// On Unix each child gets its own process group so termination also reaches
/// grandchildren spawned by wrapper scripts. Only the last `output_limit`
/// bytes of output are kept: tool summaries are printed at the end.
#[derive(Debug, Clone)]
pub struct TokioProcessLauncher {
    output_limit: usize,
}

impl Default for TokioProcessLauncher {
    fn default() -> Self {
        Self {
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl TokioProcessLauncher {
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn start(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn RunningProcess>> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let buffer = Arc::new(Mutex::new(OutputTail::new(self.output_limit)));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&buffer)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&buffer)));
        }
        debug!(pid = ?child.id(), command = %spec.display(), "process started");

        Ok(Box::new(TokioProcess {
            pid: child.id(),
            child,
            buffer,
            readers,
            reaped: false,
        }))
    }
}

/// Tail of a process's combined output.
#[derive(Debug)]
struct OutputTail {
    bytes: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl OutputTail {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        // Trim only past twice the limit so copying stays amortized.
        if self.bytes.len() > self.limit.saturating_mul(2) {
            self.trim();
        }
    }

    fn trim(&mut self) {
        let excess = self.bytes.len().saturating_sub(self.limit);
        if excess > 0 {
            self.bytes.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    fn take(&mut self) -> String {
        self.trim();
        let bytes = std::mem::take(&mut self.bytes);
        let text = String::from_utf8_lossy(&bytes);
        if self.dropped == 0 {
            text.into_owned()
        } else {
            format!("[... {} earlier bytes dropped ...]\n{text}", self.dropped)
        }
    }
}

fn spawn_reader<R>(mut stream: R, buffer: Arc<Mutex<OutputTail>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.push(&chunk[..n]);
                    }
                }
            }
        }
    })
}

struct TokioProcess {
    pid: Option<u32>,
    child: Child,
    buffer: Arc<Mutex<OutputTail>>,
    readers: Vec<JoinHandle<()>>,
    reaped: bool,
}

impl TokioProcess {
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(pid), signal) {
            debug!(pid, ?signal, error = %e, "killpg failed");
        }
    }
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait_until(&mut self, deadline: Instant, cancel: &CancellationToken) -> WaitOutcome {
        let exited = tokio::select! {
            status = self.child.wait() => status,
            _ = tokio::time::sleep_until(deadline) => return WaitOutcome::DeadlineExceeded,
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
        };
        self.reaped = true;
        // Background children of the tool would otherwise outlive the job
        // and hold the output pipes open.
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        match exited {
            Ok(status) => WaitOutcome::Exited(status.code()),
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "wait failed");
                WaitOutcome::Exited(None)
            }
        }
    }

    async fn force_kill(&mut self, grace: Duration) -> std::io::Result<()> {
        if self.reaped {
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGTERM);
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                self.reaped = true;
                // Leftover group members may still hold the output pipes.
                self.signal_group(nix::sys::signal::Signal::SIGKILL);
                return Ok(());
            }
            self.signal_group(nix::sys::signal::Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        let _ = grace;

        self.child.start_kill().ok();
        self.child.wait().await?;
        self.reaped = true;
        Ok(())
    }

    async fn take_output(&mut self) -> String {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                abort.abort();
            }
        }
        match self.buffer.lock() {
            Ok(mut buf) => buf.take(),
            Err(_) => String::new(),
        }
    }
}
