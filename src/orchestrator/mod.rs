//! Per-task execution.
//!
//! [`Orchestrator::run`] takes a claimed task from `processing` to a
//! terminal state. The work itself (build, encode, publish the output) runs
//! in a spawned task so a panic inside it is caught by the join handle, and
//! it races a hard deadline. Whichever way the body ends, the terminal step
//! runs outside it: the record is written first, then the terminal event is
//! published, so a subscriber that sees the event can read the final row.

pub mod worker;

use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reelforge_av::supervisor::CANCELLED_MESSAGE;
use reelforge_av::{BuiltCommand, CommandBuilder, Progress, Supervisor};
use reelforge_common::{ProgressEvent, TaskId, TaskKind, TaskStatus};
use reelforge_db::models::{ProgressUpdate, Task, TaskCompletion, TaskFailure};
use reelforge_db::pool::{get_conn, DbPool};
use reelforge_db::queries::tasks;
use tokio_util::sync::CancellationToken;

use crate::hub::{HubRegistry, ProgressHub};
use crate::storage::{output_key, BlobStorage};

pub use worker::WorkerPool;

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { output_url: String },
    Failed { error: String },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Everything needed to run tasks. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    pool: DbPool,
    hubs: HubRegistry,
    builder: CommandBuilder,
    supervisor: Supervisor,
    storage: Arc<dyn BlobStorage>,
    task_timeout: Duration,
    fail_on_upload_error: bool,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        hubs: HubRegistry,
        builder: CommandBuilder,
        supervisor: Supervisor,
        storage: Arc<dyn BlobStorage>,
    ) -> Self {
        Self {
            pool,
            hubs,
            builder,
            supervisor,
            storage,
            task_timeout: Duration::from_secs(30 * 60),
            fail_on_upload_error: false,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Fail tasks whose output cannot be uploaded instead of falling back
    /// to the local URL.
    pub fn with_fail_on_upload_error(mut self, fail: bool) -> Self {
        self.fail_on_upload_error = fail;
        self
    }

    /// Running encoders are killed when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn hubs(&self) -> &HubRegistry {
        &self.hubs
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run a task that is already `processing` to a terminal state.
    pub async fn run(&self, task: Task) -> TaskOutcome {
        let id = task.id;
        let publisher = self.hubs.publisher(id);
        publisher.publish(ProgressEvent::new(
            id,
            TaskStatus::Processing,
            "Task started processing",
        ));
        tracing::info!("Task {}: started ({})", id, task.kind);

        let mut body = tokio::spawn(self.clone().body(
            task,
            publisher.hub().clone(),
            self.shutdown.child_token(),
        ));

        let result = tokio::select! {
            joined = &mut body => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let message = format!("Task panic: {}", panic_message(e.into_panic()));
                    tracing::error!("Task {}: {}", id, message);
                    Err(TaskFailure::message(message))
                }
                Err(e) => Err(TaskFailure::message(format!("Task aborted: {e}"))),
            },
            _ = tokio::time::sleep(self.task_timeout) => {
                body.abort();
                // Wait for the body to be dropped: the encoder is killed and
                // scratch files are gone before the task is marked failed
                let _ = body.await;
                let message = format!("Task timeout: exceeded {}", describe(self.task_timeout));
                tracing::warn!("Task {}: {}", id, message);
                Err(TaskFailure::message(message))
            }
        };

        let outcome = match result {
            Ok(completion) => {
                let total = completion.total_frames;
                let output_url = completion.output_url.clone();
                self.store(id, "complete", |conn| {
                    tasks::complete_task(conn, id, &completion)
                });
                publisher.publish(
                    ProgressEvent::new(id, TaskStatus::Completed, "Task completed successfully")
                        .with_frames(100.0, total, total)
                        .with_eta(Some(0)),
                );
                tracing::info!("Task {}: completed, output {}", id, output_url);
                TaskOutcome::Completed { output_url }
            }
            Err(failure) => {
                let error = failure.error_message.clone();
                self.store(id, "fail", |conn| tasks::fail_task(conn, id, &failure));
                publisher.publish(ProgressEvent::new(id, TaskStatus::Failed, error.clone()));
                tracing::error!("Task {}: failed: {}", id, error);
                TaskOutcome::Failed { error }
            }
        };

        drop(publisher);
        outcome
    }

    async fn body(
        self,
        task: Task,
        hub: ProgressHub,
        cancel: CancellationToken,
    ) -> Result<TaskCompletion, TaskFailure> {
        let id = task.id;
        let output_name = task.params.output_name(&id);
        let output_path = self.storage.output_path(&output_name);

        let BuiltCommand {
            args,
            total_frames,
            scratch,
        } = self
            .builder
            .build(task.kind, &task.params, &output_path)
            .await
            .map_err(|e| TaskFailure::message(format!("Failed to build ffmpeg command: {e}")))?;

        tracing::debug!(
            "Task {}: {} frames expected, {} downloaded input(s)",
            id,
            total_frames,
            scratch.files().len()
        );

        let label = match task.kind {
            TaskKind::ImageAudioToVideo => "Processing",
            TaskKind::ImageSlideshow => "Processing slideshow",
        };
        let result = self
            .supervisor
            .execute(&args, total_frames, &cancel, |progress: Progress| {
                let event = ProgressEvent::new(
                    id,
                    TaskStatus::Processing,
                    format!(
                        "{}: {:.1}% (Frame {}/{}, Speed: {:.2}x)",
                        label, progress.percentage, progress.frame, total_frames, progress.speed
                    ),
                )
                .with_frames(progress.percentage, progress.frame, total_frames)
                .with_eta(progress.eta);
                hub.publish(event);
                self.record_progress(
                    id,
                    &ProgressUpdate {
                        progress: progress.percentage,
                        current_frame: progress.frame,
                        total_frames,
                        eta: progress.eta,
                    },
                );
            })
            .await;

        drop(scratch);

        if !result.success {
            let error_message = result
                .error_message
                .unwrap_or_else(|| "FFmpeg execution failed".to_string());
            if error_message == CANCELLED_MESSAGE {
                tracing::warn!("Task {}: encoder cancelled by shutdown", id);
            }
            return Err(TaskFailure {
                command: result.command,
                filter_graph: result.filter_graph,
                log: result.log,
                error_message,
            });
        }

        tracing::info!(
            "Task {}: encoder finished in {:.1}s after {} status lines",
            id,
            result.elapsed_secs,
            result.progress_updates
        );

        // The last status line rarely lands exactly on the final frame
        hub.publish(
            ProgressEvent::new(
                id,
                TaskStatus::Processing,
                "Processing completed, finalizing...",
            )
            .with_frames(100.0, total_frames, total_frames)
            .with_eta(Some(0)),
        );
        self.record_progress(
            id,
            &ProgressUpdate {
                progress: 100.0,
                current_frame: total_frames,
                total_frames,
                eta: Some(0),
            },
        );

        let output_url = match self.publish_output(id, &output_name, &output_path).await {
            Ok(url) => url,
            Err(error_message) => {
                return Err(TaskFailure {
                    command: result.command,
                    filter_graph: result.filter_graph,
                    log: result.log,
                    error_message,
                })
            }
        };

        Ok(TaskCompletion {
            command: result.command,
            filter_graph: result.filter_graph,
            log: result.log,
            output_file: output_path.to_string_lossy().to_string(),
            output_url,
            total_frames,
        })
    }

    /// Where clients fetch the rendered file from.
    async fn publish_output(
        &self,
        id: TaskId,
        output_name: &str,
        output_path: &Path,
    ) -> Result<String, String> {
        let key = output_key(output_name);
        let local_url = format!("/api/{}", key);

        if !self.storage.is_remote() {
            return Ok(local_url);
        }

        match self.storage.upload(output_path, &key).await {
            Ok(url) => {
                tracing::info!("Task {}: uploaded output to {}", id, url);
                if let Err(e) = self.storage.delete_local(output_path).await {
                    tracing::warn!("Task {}: failed to delete local output: {:#}", id, e);
                }
                Ok(url)
            }
            Err(e) if self.fail_on_upload_error => Err(format!("Failed to upload output: {e:#}")),
            Err(e) => {
                tracing::warn!(
                    "Task {}: failed to upload output, serving local copy: {:#}",
                    id,
                    e
                );
                Ok(local_url)
            }
        }
    }

    fn record_progress(&self, id: TaskId, update: &ProgressUpdate) {
        self.store(id, "update progress", |conn| {
            tasks::update_task_progress(conn, id, update)
        });
    }

    /// Run one write, logging instead of propagating failures: a lost
    /// progress row must not take the encode down with it.
    fn store<F>(&self, id: TaskId, what: &str, write: F)
    where
        F: FnOnce(&rusqlite::Connection) -> reelforge_common::Result<bool>,
    {
        let applied = get_conn(&self.pool).and_then(|conn| write(&*conn));
        match applied {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Task {}: {} skipped, task no longer active", id, what),
            Err(e) => tracing::error!("Task {}: failed to {}: {}", id, what, e),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// "30 minutes", or seconds when the deadline is not a whole minute.
fn describe(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{} seconds", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_timeout() {
        assert_eq!(describe(Duration::from_secs(1800)), "30 minutes");
        assert_eq!(describe(Duration::from_secs(60)), "1 minutes");
        assert_eq!(describe(Duration::from_secs(2)), "2 seconds");
        assert_eq!(describe(Duration::from_millis(500)), "0 seconds");
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42)), "unknown panic");
    }

    #[test]
    fn test_outcome() {
        assert!(TaskOutcome::Completed {
            output_url: "/api/outputs/a.mp4".into()
        }
        .is_completed());
        assert!(!TaskOutcome::Failed { error: "x".into() }.is_completed());
    }
}
