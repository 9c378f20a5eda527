//! Core type definitions for composition tasks.
//!
//! All enums serialize in snake_case, which is also the form stored in the
//! database and accepted by the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TaskId;

/// Default container format.
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp4";
/// Default video encoder.
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio encoder.
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default target video bitrate.
pub const DEFAULT_VIDEO_BITRATE: &str = "1M";
/// Default target audio bitrate.
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Default output frame rate.
pub const DEFAULT_FPS: u32 = 25;
/// Default per-image display time in a slideshow, in seconds.
pub const DEFAULT_IMAGE_DURATION: f64 = 3.0;
/// Default cross-fade length in a slideshow, in seconds.
pub const DEFAULT_TRANSITION_DURATION: f64 = 0.5;
/// Default slideshow frame size.
pub const DEFAULT_SLIDESHOW_SIZE: (u32, u32) = (1280, 720);

/// Lifecycle status of a task.
///
/// Transitions only move forward: `pending → processing → completed|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and waiting for a worker.
    Pending,
    /// Claimed by a worker and running.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// The closed set of composition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One still image looped over an audio track.
    ImageAudioToVideo,
    /// Several images joined with transitions, optionally over music.
    ImageSlideshow,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageAudioToVideo => write!(f, "image_audio_to_video"),
            Self::ImageSlideshow => write!(f, "image_slideshow"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image_audio_to_video" => Ok(Self::ImageAudioToVideo),
            "image_slideshow" => Ok(Self::ImageSlideshow),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

/// Transition algorithm between slideshow images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Cross-fade via the xfade filter.
    Fade,
    /// Hard cuts via the concat filter.
    None,
}

impl Transition {
    /// Resolve a requested transition name. Anything unrecognised falls back
    /// to a cross-fade.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("none") => Self::None,
            _ => Self::Fade,
        }
    }
}

/// Declarative description of the desired output.
///
/// Every field is optional; the accessor methods apply the fixed defaults.
/// Zero numbers and empty strings count as unset, matching what loosely
/// typed clients tend to send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    // Output settings shared by every kind
    pub output_format: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub video_bitrate: Option<String>,
    pub audio_bitrate: Option<String>,

    // Single image + audio
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
    pub audio_loop: bool,

    // Slideshow
    pub image_paths: Vec<String>,
    pub image_duration: Option<f64>,
    pub transition_type: Option<String>,
    #[serde(alias = "transition_dur")]
    pub transition_duration: Option<f64>,
    pub background_audio: Option<String>,
}

fn text_or<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}

fn set_text(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl TaskParams {
    pub fn output_format(&self) -> &str {
        text_or(&self.output_format, DEFAULT_OUTPUT_FORMAT)
    }

    pub fn video_codec(&self) -> &str {
        text_or(&self.video_codec, DEFAULT_VIDEO_CODEC)
    }

    pub fn audio_codec(&self) -> &str {
        text_or(&self.audio_codec, DEFAULT_AUDIO_CODEC)
    }

    pub fn video_bitrate(&self) -> &str {
        text_or(&self.video_bitrate, DEFAULT_VIDEO_BITRATE)
    }

    pub fn audio_bitrate(&self) -> &str {
        text_or(&self.audio_bitrate, DEFAULT_AUDIO_BITRATE)
    }

    pub fn fps(&self) -> u32 {
        self.fps.filter(|f| *f > 0).unwrap_or(DEFAULT_FPS)
    }

    /// Requested frame size, only when both dimensions are set.
    pub fn size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Slideshow frame size; each missing dimension takes the default.
    pub fn slideshow_size(&self) -> (u32, u32) {
        let (dw, dh) = DEFAULT_SLIDESHOW_SIZE;
        (
            self.width.filter(|w| *w > 0).unwrap_or(dw),
            self.height.filter(|h| *h > 0).unwrap_or(dh),
        )
    }

    pub fn image_duration(&self) -> f64 {
        self.image_duration
            .filter(|d| *d > 0.0)
            .unwrap_or(DEFAULT_IMAGE_DURATION)
    }

    pub fn transition_duration(&self) -> f64 {
        self.transition_duration
            .filter(|d| *d > 0.0)
            .unwrap_or(DEFAULT_TRANSITION_DURATION)
    }

    pub fn transition(&self) -> Transition {
        Transition::from_name(set_text(&self.transition_type))
    }

    pub fn image_path(&self) -> Option<&str> {
        set_text(&self.image_path)
    }

    pub fn audio_path(&self) -> Option<&str> {
        set_text(&self.audio_path)
    }

    pub fn background_audio(&self) -> Option<&str> {
        set_text(&self.background_audio)
    }

    /// Non-empty slideshow image references, in order.
    pub fn slideshow_images(&self) -> Vec<&str> {
        self.image_paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Name of the output file for a task: `{task_id}.{format}`.
    pub fn output_name(&self, task_id: &TaskId) -> String {
        format!("{}.{}", task_id, self.output_format())
    }
}

/// A timestamped progress snapshot for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Completion percentage in `[0, 100]`.
    pub progress: f64,
    pub current_frame: u64,
    pub total_frames: u64,
    /// Estimated seconds remaining, when known.
    pub eta: Option<u64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event with zeroed counters.
    pub fn new(task_id: TaskId, status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            task_id,
            status,
            progress: 0.0,
            current_frame: 0,
            total_frames: 0,
            eta: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Set the frame counters and percentage.
    pub fn with_frames(mut self, progress: f64, current_frame: u64, total_frames: u64) -> Self {
        self.progress = progress.clamp(0.0, 100.0);
        self.current_frame = current_frame;
        self.total_frames = total_frames;
        self
    }

    pub fn with_eta(mut self, eta: Option<u64>) -> Self {
        self.eta = eta;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
