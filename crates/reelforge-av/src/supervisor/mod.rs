//! Supervised encoder execution.
//!
//! [`Supervisor::execute`] runs one ffmpeg process to completion while
//! draining both output pipes, turning status lines into [`Progress`]
//! reports and watching for stalls. It never returns an error: every outcome,
//! including a failure to spawn, is described by the [`ExecuteResult`].
//!
//! Within one execution three futures run concurrently in the same scope:
//! the stderr drain (which parses progress), the stdout drain, and the
//! watchdog. The child is spawned with `kill_on_drop`, so dropping the
//! execution future (for example when an outer deadline aborts the task)
//! also kills the process. Once a kill fires, the drains stop waiting for
//! end-of-file after [`DRAIN_GRACE`]: a grandchild that inherited the pipes
//! must not keep the execution alive.

mod diagnostics;
mod lines;
mod status;
mod watchdog;

pub use diagnostics::{command_line, extract_error, filter_graph};
pub use lines::LineSplitter;
pub use status::{parse_status_line, Progress, ProgressTracker, StatusLine};
pub use watchdog::{Trip, WatchdogSettings};

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use watchdog::ActivityMonitor;

/// Message used when the caller cancels a running execution.
pub const CANCELLED_MESSAGE: &str = "FFmpeg execution cancelled";

/// How long output pipes are still read after the process was killed.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything known about a finished execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    /// The full command line that was run.
    pub command: String,
    pub filter_graph: String,
    /// Diagnostic output: stderr, then stdout under a separator when present.
    pub log: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub elapsed_secs: f64,
    /// Number of status lines parsed.
    pub progress_updates: u64,
}

/// Runs ffmpeg under a stall watchdog.
#[derive(Debug, Clone)]
pub struct Supervisor {
    binary: PathBuf,
    watchdog: WatchdogSettings,
}

impl Supervisor {
    pub fn new(binary: impl Into<PathBuf>, watchdog: WatchdogSettings) -> Self {
        Self {
            binary: binary.into(),
            watchdog,
        }
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    /// Run `binary args...` to completion.
    ///
    /// `on_progress` is called synchronously for every status line, in
    /// order. Cancelling `cancel` kills the process; cancelling after it has
    /// already exited has no effect.
    pub async fn execute<F>(
        &self,
        args: &[String],
        total_frames: u64,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> ExecuteResult
    where
        F: FnMut(Progress) + Send,
    {
        let started = Instant::now();
        let binary = self.binary.to_string_lossy().to_string();
        let mut result = ExecuteResult {
            command: command_line(&binary, args),
            filter_graph: filter_graph(args),
            ..Default::default()
        };

        tracing::info!("Executing: {}", result.command);

        let mut child = match Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start {}: {}", binary, e);
                result.error_message = Some(format!("failed to start ffmpeg: {e}"));
                result.elapsed_secs = started.elapsed().as_secs_f64();
                return result;
            }
        };

        tracing::debug!("Process started, pid {:?}", child.id());

        let (Some(stderr), Some(stdout)) = (child.stderr.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            result.error_message = Some("failed to capture ffmpeg output pipes".into());
            result.elapsed_secs = started.elapsed().as_secs_f64();
            return result;
        };

        let monitor = ActivityMonitor::new();
        let kill = cancel.child_token();
        let done = CancellationToken::new();

        let stderr_drain = async {
            let mut tracker = ProgressTracker::new(total_frames);
            drain(stderr, &monitor, &kill, |line| {
                if let Some(status) = parse_status_line(line) {
                    monitor.progress(status.frame);
                    let progress = tracker.track(status);
                    if monitor.reports() == 1 || monitor.reports() % 10 == 0 {
                        tracing::debug!(
                            "Progress #{}: {:.1}% (frame {}/{}, speed {:.2}x)",
                            monitor.reports(),
                            progress.percentage,
                            progress.frame,
                            total_frames,
                            progress.speed
                        );
                    }
                    on_progress(progress);
                }
            })
            .await
        };
        let stdout_drain = drain(stdout, &monitor, &kill, |_| {});

        let work = async {
            let outcome = tokio::join!(wait_or_kill(&mut child, &kill), stderr_drain, stdout_drain);
            done.cancel();
            outcome
        };
        let watch = watchdog::watch(&monitor, &self.watchdog, &kill, &done);

        let ((status, stderr_log, stdout_log), trip) = tokio::join!(work, watch);

        result.log = stderr_log;
        if !stdout_log.is_empty() {
            result.log.push_str("\n=== STDOUT ===\n");
            result.log.push_str(&stdout_log);
        }
        result.progress_updates = monitor.reports();
        result.elapsed_secs = started.elapsed().as_secs_f64();

        match status {
            Ok(status) if status.success() && trip.is_none() => {
                result.success = true;
                tracing::info!("FFmpeg finished in {:.2}s", result.elapsed_secs);
            }
            outcome => {
                let message = if let Some(trip) = trip {
                    trip.to_string()
                } else if cancel.is_cancelled() {
                    CANCELLED_MESSAGE.to_string()
                } else {
                    match outcome {
                        Ok(status) => failure_text(&result.log, status),
                        Err(e) => format!("failed waiting for ffmpeg: {e}"),
                    }
                };
                tracing::warn!(
                    "FFmpeg failed after {:.2}s: {}",
                    result.elapsed_secs,
                    message
                );
                result.error_message = Some(message);
            }
        }

        if result.progress_updates == 0 {
            tracing::warn!("FFmpeg produced no progress updates");
        }

        result
    }
}

fn failure_text(log: &str, status: ExitStatus) -> String {
    let text = extract_error(log);
    if text.is_empty() {
        format!("ffmpeg exited with {status}")
    } else {
        text
    }
}

/// Wait for exit, killing the child first if `kill` fires.
async fn wait_or_kill(child: &mut Child, kill: &CancellationToken) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            // Already exited is fine: start_kill then reports an error we ignore.
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// Read every line of `pipe`, recording activity and handing each line to
/// `on_line`. Returns the text with `\n` after each line.
///
/// Reading stops at end-of-file, or [`DRAIN_GRACE`] after `kill` fires.
async fn drain<R, F>(
    pipe: R,
    monitor: &ActivityMonitor,
    kill: &CancellationToken,
    mut on_line: F,
) -> String
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut splitter = LineSplitter::new(pipe);
    let mut text = String::new();
    let mut count = 0u64;

    let abandon = async {
        kill.cancelled().await;
        tokio::time::sleep(DRAIN_GRACE).await;
    };
    tokio::pin!(abandon);

    loop {
        let next = tokio::select! {
            next = splitter.next_line() => next,
            _ = &mut abandon => {
                tracing::warn!(
                    "Output pipe still open {}s after kill, abandoning it",
                    DRAIN_GRACE.as_secs()
                );
                break;
            }
        };
        match next {
            Ok(Some(line)) => {
                count += 1;
                if count == 1 {
                    tracing::debug!("First output line: {}", line);
                }
                monitor.output();
                on_line(&line);
                text.push_str(&line);
                text.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Error reading ffmpeg output: {}", e);
                break;
            }
        }
    }

    text
}
