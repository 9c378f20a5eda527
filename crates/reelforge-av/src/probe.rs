//! ffprobe-based media inspection.
//!
//! [`MediaProber`] is the seam the command builder and the task service use
//! to validate inputs and to learn audio durations. [`Ffprobe`] is the real
//! implementation; tests substitute their own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::{Error, Result};

/// Summary of a media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container format name as reported by ffprobe.
    pub format_name: String,
    /// Duration in seconds, when known.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl MediaInfo {
    /// Frame count implied by duration and frame rate.
    pub fn total_frames(&self) -> Option<u64> {
        match (self.duration, self.fps) {
            (Some(d), Some(f)) if d > 0.0 && f > 0.0 => Some((d * f).round() as u64),
            _ => None,
        }
    }
}

/// Media inspection used by validation and command building.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Describe a local media file.
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Check that a reference (local path or URL) is readable media.
    async fn validate(&self, reference: &str) -> Result<()>;

    /// Container duration of an audio file, in seconds.
    async fn audio_duration(&self, path: &Path) -> Result<f64>;
}

/// [`MediaProber`] backed by the ffprobe executable.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    path: PathBuf,
    timeout: Duration,
}

impl Ffprobe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.path.clone());
        cmd.timeout(self.timeout);
        cmd
    }
}

#[async_trait]
impl MediaProber for Ffprobe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let output = self
            .command()
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path.to_string_lossy())
            .execute()
            .await?;

        parse_probe_json(&output.stdout)
    }

    async fn validate(&self, reference: &str) -> Result<()> {
        self.command()
            .args(["-v", "error", reference])
            .execute()
            .await
            .map(|_| ())
            .map_err(|e| match e {
                Error::ToolNotFound { .. } => e,
                other => Error::InvalidInput(format!("invalid media file {reference}: {other}")),
            })
    }

    async fn audio_duration(&self, path: &Path) -> Result<f64> {
        let output = self
            .command()
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path.to_string_lossy())
            .execute()
            .await?;

        parse_duration(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

fn parse_probe_json(json: &str) -> Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)?;

    let mut info = MediaInfo {
        format_name: output.format.format_name,
        duration: output.format.duration.and_then(|s| s.parse().ok()),
        ..Default::default()
    };

    for stream in output.streams {
        match stream.codec_type.as_str() {
            "video" if info.video_codec.is_none() => {
                info.video_codec = stream.codec_name;
                info.width = stream.width;
                info.height = stream.height;
                info.fps = stream.r_frame_rate.as_deref().and_then(parse_frame_rate);
                if info.duration.is_none() {
                    info.duration = stream.duration.and_then(|s| s.parse().ok());
                }
            }
            "audio" if info.audio_codec.is_none() => {
                info.audio_codec = stream.codec_name;
            }
            _ => {}
        }
    }

    Ok(info)
}

fn parse_duration(stdout: &str) -> Result<f64> {
    let value = stdout.trim();
    value
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| Error::parse_error("ffprobe", format!("invalid duration: {value:?}")))
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den != 0.0).then(|| num / den);
    }
    rate_str.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(23.976023976023978));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10.000000\n").unwrap(), 10.0);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_probe_json() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264",
                 "width": 1280, "height": 720, "r_frame_rate": "25/1"},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"filename": "x.mp4", "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                       "duration": "8.000000"}
        }"#;

        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.width, Some(1280));
        assert_eq!(info.fps, Some(25.0));
        assert_eq!(info.duration, Some(8.0));
        assert_eq!(info.total_frames(), Some(200));
    }

    #[test]
    fn test_parse_probe_json_audio_only() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}],
                       "format": {"format_name": "mp3", "duration": "10.0"}}"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.video_codec, None);
        assert_eq!(info.total_frames(), None);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let prober = Ffprobe::new("ffprobe");
        let result = prober.probe(Path::new("/nonexistent/clip.mp4")).await;
        assert!(matches!(result, Err(Error::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let prober = Ffprobe::new("/nonexistent/ffprobe");
        let result = prober.validate("clip.mp4").await;
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
    }
}
