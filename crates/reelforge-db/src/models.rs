//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use reelforge_common::{TaskId, TaskKind, TaskParams, TaskStatus};
use serde::{Deserialize, Serialize};

/// A composition task and its full execution record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_frame: u64,
    pub total_frames: u64,
    pub eta: Option<u64>,
    #[serde(rename = "input_params")]
    pub params: TaskParams,
    /// The exact command line that was run.
    pub command: String,
    pub filter_graph: String,
    /// Captured diagnostic output of the encoder.
    pub log: String,
    pub error_message: String,
    pub output_file: String,
    pub output_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field set written on every parsed progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub current_frame: u64,
    pub total_frames: u64,
    pub eta: Option<u64>,
}

/// Field set written when a task completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskCompletion {
    pub command: String,
    pub filter_graph: String,
    pub log: String,
    pub output_file: String,
    pub output_url: String,
    pub total_frames: u64,
}

/// Field set written when a task fails. Artifacts not produced yet stay
/// empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFailure {
    pub command: String,
    pub filter_graph: String,
    pub log: String,
    pub error_message: String,
}

impl TaskFailure {
    /// A failure with only an error summary.
    pub fn message(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            ..Default::default()
        }
    }
}
