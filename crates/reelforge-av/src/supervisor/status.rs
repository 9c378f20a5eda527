//! Parser for ffmpeg `-stats` status lines.
//!
//! A status line looks like
//! `frame=  120 fps= 30 q=28.0 size=  256kB time=00:00:04.00 bitrate= 524.3kbits/s speed=1.0x`.
//! Fields may be missing or `N/A` early in a run; missing numbers read as 0.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid regex"));
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fps=\s*([\d.]+)").expect("valid regex"));
static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate=\s*([\d.]+\s*\w+/s)").expect("valid regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*([\d:\.]+)").expect("valid regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("valid regex"));

/// Raw fields of one status line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusLine {
    pub frame: u64,
    pub fps: f64,
    pub bitrate: Option<String>,
    pub time: Option<String>,
    pub speed: f64,
}

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse a status line. Lines without `frame=` are not status lines.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    if !line.contains("frame=") {
        return None;
    }

    Some(StatusLine {
        frame: capture(&FRAME_RE, line)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        fps: capture(&FPS_RE, line)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
        bitrate: capture(&BITRATE_RE, line).map(str::to_string),
        time: capture(&TIME_RE, line).map(str::to_string),
        speed: capture(&SPEED_RE, line)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
    })
}

impl StatusLine {
    /// `frame / total × 100`, capped at 100. Zero when the total is unknown.
    pub fn percentage(&self, total_frames: u64) -> f64 {
        if total_frames == 0 {
            return 0.0;
        }
        (self.frame as f64 / total_frames as f64 * 100.0).min(100.0)
    }

    /// Seconds remaining at the current throughput, when it is measurable.
    pub fn eta(&self, total_frames: u64) -> Option<u64> {
        if total_frames == 0 || self.speed <= 0.0 || self.fps <= 0.0 {
            return None;
        }
        let remaining = total_frames.saturating_sub(self.frame) as f64;
        Some((remaining / (self.fps * self.speed)) as u64)
    }
}

/// A typed progress report for one status line.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub frame: u64,
    pub total_frames: u64,
    pub fps: f64,
    pub bitrate: Option<String>,
    pub time: Option<String>,
    pub speed: f64,
    /// Completion in `[0, 100]`, never lower than an earlier report.
    pub percentage: f64,
    pub eta: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Turns status lines into [`Progress`] with a non-decreasing percentage.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_frames: u64,
    high_water: f64,
}

impl ProgressTracker {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            high_water: 0.0,
        }
    }

    pub fn track(&mut self, status: StatusLine) -> Progress {
        let percentage = status
            .percentage(self.total_frames)
            .clamp(0.0, 100.0)
            .max(self.high_water);
        self.high_water = percentage;

        Progress {
            frame: status.frame,
            total_frames: self.total_frames,
            fps: status.fps,
            eta: status.eta(self.total_frames),
            percentage,
            speed: status.speed,
            bitrate: status.bitrate,
            time: status.time,
            timestamp: Utc::now(),
        }
    }
}
