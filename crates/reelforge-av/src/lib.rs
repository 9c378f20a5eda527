//! # reelforge-av
//!
//! The ffmpeg layer of reelforge.
//!
//! This crate provides:
//!
//! - **Command building** ([`CommandBuilder`]): maps semantic task
//!   parameters to an ffmpeg argument vector, including the slideshow
//!   cross-fade filter graph, and resolves inputs through an
//!   [`InputFetcher`].
//! - **Supervised execution** ([`Supervisor`]): runs ffmpeg, parses its
//!   `-stats` output into [`Progress`] reports and kills stalled runs.
//! - **Probing** ([`MediaProber`], [`Ffprobe`]): input validation and audio
//!   durations.
//! - **Scratch cleanup** ([`ScratchFiles`]): downloaded inputs are removed
//!   when the guard drops, on every exit path.
//! - **Tool discovery** ([`check_tools`], [`get_tool_path`]).
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use reelforge_av::{CommandBuilder, Ffprobe, LocalOnly, Supervisor, WatchdogSettings};
//! use reelforge_common::{TaskKind, TaskParams};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> reelforge_av::Result<()> {
//! let builder = CommandBuilder::new(
//!     Arc::new(LocalOnly::new("/tmp")),
//!     Arc::new(Ffprobe::new("ffprobe")),
//! );
//! let params = TaskParams {
//!     image_path: Some("cat.jpg".into()),
//!     audio_path: Some("purr.mp3".into()),
//!     ..Default::default()
//! };
//! let built = builder
//!     .build(TaskKind::ImageAudioToVideo, &params, Path::new("cat.mp4"))
//!     .await?;
//!
//! let supervisor = Supervisor::new("ffmpeg", WatchdogSettings::default());
//! let result = supervisor
//!     .execute(&built.args, built.total_frames, &CancellationToken::new(), |p| {
//!         println!("{:.1}%", p.percentage);
//!     })
//!     .await;
//! println!("success: {}", result.success);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod compose;
mod error;
pub mod fetch;
pub mod probe;
pub mod scratch;
pub mod supervisor;
pub mod tools;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use compose::{BuiltCommand, CommandBuilder, SlideshowLayout};
pub use error::{Error, Result};
pub use fetch::{Fetched, InputFetcher, LocalOnly};
pub use probe::{Ffprobe, MediaInfo, MediaProber};
pub use scratch::ScratchFiles;
pub use supervisor::{ExecuteResult, Progress, Supervisor, WatchdogSettings};
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo};
