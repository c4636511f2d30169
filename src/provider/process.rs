use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 10 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_GRACE: Duration = Duration::from_secs(2);
/// How long pipes may stay open after the group leader exits before the rest
/// of the group is terminated.
const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Signals a caller may request. An unconditional kill is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "SIGTERM")]
    Terminate,
    #[serde(rename = "SIGINT")]
    Interrupt,
}

impl Signal {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SIGTERM" | "TERM" | "15" => Ok(Self::Terminate),
            "SIGINT" | "INT" | "2" => Ok(Self::Interrupt),
            "SIGKILL" | "KILL" | "9" => Err(
                "SIGKILL is not allowed; it can orphan provider subprocesses. Use SIGTERM or SIGINT"
                    .to_string(),
            ),
            other => Err(format!(
                "signal `{other}` is not allowed; expected SIGTERM or SIGINT"
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
        }
    }

    fn kill_arg(self) -> &'static str {
        match self {
            Self::Terminate => "-TERM",
            Self::Interrupt => "-INT",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Delivers a signal to every process in a process group.
pub trait SignalSender: Send + Sync {
    fn signal_group(&self, pgid: u32, signal: Signal) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaler;

impl SignalSender for SystemSignaler {
    #[cfg(unix)]
    fn signal_group(&self, pgid: u32, signal: Signal) -> std::io::Result<()> {
        if pgid <= 1 {
            return Err(std::io::Error::other(format!(
                "refusing to signal process group {pgid}"
            )));
        }
        let status = Command::new("kill")
            .arg(signal.kill_arg())
            .arg("--")
            .arg(format!("-{pgid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no process group {pgid} to signal"),
            ))
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, pgid: u32, signal: Signal) -> std::io::Result<()> {
        let _ = signal;
        let status = Command::new("taskkill")
            .arg("/T")
            .arg("/PID")
            .arg(pgid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "taskkill failed for process tree {pgid}"
            )))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited {
        exit_code: Option<i32>,
        success: bool,
        stdout: CapturedOutput,
        stderr: CapturedOutput,
    },
    TimedOut {
        timeout: Duration,
        stdout: CapturedOutput,
    },
    WaitFailed(String),
}

pub type ExitCallback = Box<dyn FnOnce(ProcessOutcome) + Send + 'static>;

/// A spawned process that leads its own process group.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;
    fn signal_group(&self, signal: Signal) -> std::io::Result<()>;
    /// Consumes the handle; `callback` runs on a background thread once the
    /// process exits or its timeout elapses.
    fn on_exit(self: Box<Self>, callback: ExitCallback);
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub binary: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdin_payload: String,
    pub timeout: Duration,
    pub output_cap_bytes: usize,
}

pub struct ChildProcess {
    child: Child,
    pid: u32,
    started: Instant,
    timeout: Duration,
    stdout: OutputCapture,
    stderr: OutputCapture,
    signaler: Arc<dyn SignalSender>,
}

/// Spawns `request.binary` detached into a new process group. The stdin
/// payload is written from a separate thread, so the timeout covers input
/// delivery as well as execution.
pub fn spawn_process(
    request: &SpawnRequest,
    signaler: Arc<dyn SignalSender>,
) -> std::io::Result<ChildProcess> {
    let mut command = Command::new(&request.binary);
    command
        .current_dir(&request.cwd)
        .args(&request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command.spawn()?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("missing stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("missing stderr pipe"))?;
    let stdout = OutputCapture::spawn(stdout, request.output_cap_bytes);
    let stderr = OutputCapture::spawn(stderr, request.output_cap_bytes);

    if let Some(stdin) = child.stdin.take() {
        spawn_stdin_writer(stdin, request.stdin_payload.clone(), pid);
    }

    Ok(ChildProcess {
        child,
        pid,
        started,
        timeout: request.timeout,
        stdout,
        stderr,
        signaler,
    })
}

fn spawn_stdin_writer<W: Write + Send + 'static>(mut stdin: W, payload: String, pid: u32) {
    thread::spawn(move || {
        match stdin.write_all(payload.as_bytes()) {
            Ok(()) => {}
            // The process exited or was terminated before reading everything.
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(err) => tracing::debug!(pid, error = %err, "stdin delivery failed"),
        }
        // Dropping `stdin` closes the pipe.
    });
}

#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A reader thread filling a shared buffer. The buffer stays readable even
/// when a descendant keeps the pipe open past the leader's exit.
struct OutputCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    closed: Receiver<()>,
}

impl OutputCapture {
    fn spawn<R: Read + Send + 'static>(mut source: R, cap: usize) -> Self {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let (tx, closed) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0_u8; READ_CHUNK_BYTES];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut guard = shared.lock().unwrap_or_else(|p| p.into_inner());
                        let room = cap.saturating_sub(guard.bytes.len());
                        if n > room {
                            guard.truncated = true;
                        }
                        guard.bytes.extend_from_slice(&chunk[..n.min(room)]);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        Self { buffer, closed }
    }

    /// True once the pipe reached EOF within `grace`.
    fn wait_closed(&self, grace: Duration) -> bool {
        !matches!(
            self.closed.recv_timeout(grace),
            Err(mpsc::RecvTimeoutError::Timeout)
        )
    }

    fn snapshot(&self) -> CapturedOutput {
        let guard = self.buffer.lock().unwrap_or_else(|p| p.into_inner());
        CapturedOutput {
            text: String::from_utf8_lossy(&guard.bytes).into_owned(),
            truncated: guard.truncated,
        }
    }
}

impl ChildProcess {
    /// Blocks until exit or timeout. The deadline runs from spawn. On timeout
    /// the whole group is terminated.
    pub fn wait(mut self) -> ProcessOutcome {
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if self.started.elapsed() > self.timeout {
                        let _ = self.signaler.signal_group(self.pid, Signal::Terminate);
                        let _ = self.child.kill();
                        let _ = self.child.wait();
                        self.stdout.wait_closed(DRAIN_GRACE);
                        return ProcessOutcome::TimedOut {
                            timeout: self.timeout,
                            stdout: self.stdout.snapshot(),
                        };
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(err) => return ProcessOutcome::WaitFailed(err.to_string()),
            }
        };

        let drained = self.stdout.wait_closed(EXIT_DRAIN) && self.stderr.wait_closed(EXIT_DRAIN);
        if !drained {
            // A descendant outlived the leader and still holds a pipe.
            tracing::debug!(pid = self.pid, "terminating leftover process group members");
            let _ = self.signaler.signal_group(self.pid, Signal::Terminate);
            self.stdout.wait_closed(DRAIN_GRACE);
            self.stderr.wait_closed(DRAIN_GRACE);
        }
        ProcessOutcome::Exited {
            exit_code: status.code(),
            success: status.success(),
            stdout: self.stdout.snapshot(),
            stderr: self.stderr.snapshot(),
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal_group(&self, signal: Signal) -> std::io::Result<()> {
        self.signaler.signal_group(self.pid, signal)
    }

    fn on_exit(self: Box<Self>, callback: ExitCallback) {
        let process = *self;
        thread::spawn(move || callback(process.wait()));
    }
}
