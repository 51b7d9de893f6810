//! Supervised execution of long-running external tools.
//!
//! The supervisor drains both output streams concurrently, tracks the time of
//! the last byte seen on either stream, and kills the child when it has gone
//! quiet for too long while its last line says it was busy. Every complete
//! output line is offered to an optional bounded sink without ever waiting on
//! it, so a slow consumer can only lose lines, never stall the pipes.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::command::Invocation;

/// Sentinel reported for a supervisor-detected stall.
pub const STALL_EXIT_CODE: i32 = -9;
/// Sentinel reported when the process could not be started.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Partial lines longer than this are flushed as a line of their own.
const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Configuration for the process supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Output silence after which a busy process counts as stalled
    pub stall_timeout: Duration,
    /// Watchdog check cadence
    pub check_interval: Duration,
    /// Markers (case-insensitive) that identify a busy last line
    pub stall_markers: Vec<String>,
    /// How long to keep draining pipes after the child exits
    pub drain_timeout: Duration,
    /// Capacity of the output line side channel
    pub line_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(300),
            check_interval: Duration::from_secs(30),
            stall_markers: vec!["processing".to_string(), "downloading".to_string()],
            drain_timeout: Duration::from_secs(5),
            line_capacity: 256,
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stall_timeout: Duration::from_secs(
                std::env::var("SUPERVISOR_STALL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            check_interval: Duration::from_secs(
                std::env::var("SUPERVISOR_CHECK_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            stall_markers: std::env::var("SUPERVISOR_STALL_MARKERS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|m| m.trim().to_lowercase())
                        .filter(|m| !m.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|markers| !markers.is_empty())
                .unwrap_or(defaults.stall_markers),
            drain_timeout: defaults.drain_timeout,
            line_capacity: defaults.line_capacity,
        }
    }

    /// Whether `line` says the process was in the middle of work.
    pub fn is_busy_line(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.stall_markers
            .iter()
            .any(|marker| line.contains(&marker.to_lowercase()))
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The supervisor killed the process, or it exited after a stall.
    Stalled,
    /// The process could not be started.
    SpawnFailed,
}

impl ExitOutcome {
    /// Numeric status: the exit code, or a negative sentinel.
    pub fn sentinel(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Stalled => STALL_EXIT_CODE,
            ExitOutcome::SpawnFailed => SPAWN_FAILED_EXIT_CODE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exited with code {}", code),
            ExitOutcome::Stalled => write!(f, "stalled ({})", STALL_EXIT_CODE),
            ExitOutcome::SpawnFailed => write!(f, "spawn failed ({})", SPAWN_FAILED_EXIT_CODE),
        }
    }
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Receiver side of the output side channel.
pub type LineSink = mpsc::Sender<OutputLine>;

/// Shared between the pipe readers and the watchdog.
#[derive(Debug)]
struct Activity {
    last_activity: Instant,
    last_line: String,
}

impl Activity {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            last_line: String::new(),
        }
    }
}

fn lock(activity: &Mutex<Activity>) -> std::sync::MutexGuard<'_, Activity> {
    activity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs external processes under an inactivity watchdog.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    /// Create a new supervisor.
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run a command to completion.
    pub async fn run(&self, invocation: &Invocation) -> ExitOutcome {
        self.run_with_sink(invocation, None).await
    }

    /// Run a command, offering every output line to `sink`.
    pub async fn run_with_sink(
        &self,
        invocation: &Invocation,
        sink: Option<LineSink>,
    ) -> ExitOutcome {
        let program = invocation.program().to_string();
        info!("Running {}", invocation);
        debug!("Command line: {}", invocation.command_line());

        let mut child = match invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {}: {}", program, e);
                counter!("fswap_process_spawn_failures_total", "program" => program).increment(1);
                return ExitOutcome::SpawnFailed;
            }
        };

        let started = Instant::now();
        let activity = Arc::new(Mutex::new(Activity::new()));
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stdout,
                StreamKind::Stdout,
                Arc::clone(&activity),
                sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stderr,
                StreamKind::Stderr,
                Arc::clone(&activity),
                sink,
            )));
        }

        let check_interval = self.config.check_interval;
        let mut watchdog = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = watchdog.tick() => {
                    let (idle, last_line) = {
                        let state = lock(&activity);
                        (state.last_activity.elapsed(), state.last_line.clone())
                    };
                    if idle <= self.config.stall_timeout {
                        continue;
                    }
                    if self.config.is_busy_line(&last_line) {
                        error!(
                            "{} produced no output for {:?}, killing it; last line: {}",
                            program, idle, last_line
                        );
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill {}: {}", program, e);
                        }
                        drain(readers, self.config.drain_timeout).await;
                        counter!("fswap_process_stalls_total", "program" => program).increment(1);
                        return ExitOutcome::Stalled;
                    }
                    warn!(
                        "{} produced no output for {:?}, still waiting; last line: {}",
                        program, idle, last_line
                    );
                }
            }
        };

        drain(readers, self.config.drain_timeout).await;
        histogram!("fswap_process_duration_seconds", "program" => program.clone())
            .record(started.elapsed().as_secs_f64());

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to wait for {}: {}", program, e);
                return ExitOutcome::Exited(SPAWN_FAILED_EXIT_CODE);
            }
        };

        let idle = lock(&activity).last_activity.elapsed();
        if idle > self.config.stall_timeout {
            warn!(
                "{} exited after {:?} without output, treating as stalled",
                program, idle
            );
            counter!("fswap_process_stalls_total", "program" => program).increment(1);
            return ExitOutcome::Stalled;
        }

        let code = exit_code(status);
        info!("{} exited with code {}", program, code);
        ExitOutcome::Exited(code)
    }
}

/// Exit code, mapping signal termination to the shell's `128 + signal`.
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
    SPAWN_FAILED_EXIT_CODE
}

/// Wait for the pipe readers, abandoning any still blocked at the deadline.
async fn drain(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout_at(deadline, reader).await.is_err() {
            debug!("Output reader still blocked after exit, abandoning it");
            abort.abort();
        }
    }
}

/// Read one pipe until EOF, splitting on `\n` and `\r`.
async fn pump<R>(
    mut reader: R,
    stream: StreamKind,
    activity: Arc<Mutex<Activity>>,
    sink: Option<LineSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Error reading {:?}: {}", stream, e);
                break;
            }
        };

        pending.extend_from_slice(&buf[..n]);
        let mut lines = split_lines(&mut pending);
        if pending.len() > MAX_PARTIAL_LINE {
            lines.extend(take_line(std::mem::take(&mut pending)));
        }

        {
            let mut state = lock(&activity);
            state.last_activity = Instant::now();
            // A progress bar redraws its line without a terminator, so the
            // unterminated tail is what is currently on screen.
            let tail = String::from_utf8_lossy(&pending).trim().to_string();
            if !tail.is_empty() {
                state.last_line = tail;
            } else if let Some(last) = lines.last() {
                state.last_line = last.clone();
            }
        }

        offer(&sink, stream, lines);
    }

    offer(&sink, stream, take_line(pending).into_iter().collect());
}

/// Drain every terminated line from `pending`.
fn split_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
        let mut line: Vec<u8> = pending.drain(..=pos).collect();
        line.pop();
        lines.extend(take_line(line));
    }
    lines
}

fn take_line(bytes: Vec<u8>) -> Option<String> {
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Hand lines to the sink without waiting; lines that do not fit are dropped.
fn offer(sink: &Option<LineSink>, stream: StreamKind, lines: Vec<String>) {
    let Some(sink) = sink else {
        return;
    };
    for text in lines {
        match sink.try_send(OutputLine { stream, text }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("fswap_output_lines_dropped_total").increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}
