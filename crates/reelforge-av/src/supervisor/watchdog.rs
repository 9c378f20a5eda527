//! Stall detection for a running encoder.
//!
//! Two failure shapes are caught:
//!
//! - the process never reports progress and goes quiet (bad input, a
//!   network stall opening a source, a filter graph that never starts)
//! - progress was reported once but the frame counter stopped advancing

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Timing for the stall watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    /// How often activity is checked.
    pub tick: Duration,
    /// Quiet period tolerated before the first progress report.
    pub startup_timeout: Duration,
    /// Period without a frame advance tolerated once progress was seen.
    pub stall_timeout: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(300),
        }
    }
}

/// Why the watchdog killed a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trip {
    NoProgress { after: Duration },
    Stalled { after: Duration, frame: u64 },
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProgress { after } => write!(
                f,
                "FFmpeg made no progress within {}s of starting, process terminated",
                after.as_secs()
            ),
            Self::Stalled { after, frame } => write!(
                f,
                "FFmpeg progress stalled for {}s at frame {}, process terminated",
                after.as_secs(),
                frame
            ),
        }
    }
}

#[derive(Debug)]
struct Activity {
    last_output: Instant,
    last_advance: Instant,
    reports: u64,
    frame: u64,
}

/// Shared record of what a process has emitted so far.
#[derive(Debug, Clone)]
pub(crate) struct ActivityMonitor(Arc<Mutex<Activity>>);

impl ActivityMonitor {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self(Arc::new(Mutex::new(Activity {
            last_output: now,
            last_advance: now,
            reports: 0,
            frame: 0,
        })))
    }

    /// Any line of output was seen.
    pub(crate) fn output(&self) {
        self.0.lock().last_output = Instant::now();
    }

    /// A status line reporting `frame` was seen.
    pub(crate) fn progress(&self, frame: u64) {
        let mut activity = self.0.lock();
        activity.reports += 1;
        if frame > activity.frame {
            activity.frame = frame;
            activity.last_advance = Instant::now();
        }
    }

    pub(crate) fn reports(&self) -> u64 {
        self.0.lock().reports
    }

    fn verdict(&self, now: Instant, settings: &WatchdogSettings) -> Option<Trip> {
        let activity = self.0.lock();
        if activity.reports == 0 {
            let quiet = now.duration_since(activity.last_output);
            (quiet > settings.startup_timeout).then_some(Trip::NoProgress {
                after: settings.startup_timeout,
            })
        } else {
            let stalled = now.duration_since(activity.last_advance);
            (stalled > settings.stall_timeout).then_some(Trip::Stalled {
                after: settings.stall_timeout,
                frame: activity.frame,
            })
        }
    }
}

/// Check activity every tick until `done` fires.
///
/// On a trip the `kill` token is cancelled and the reason returned.
pub(crate) async fn watch(
    monitor: &ActivityMonitor,
    settings: &WatchdogSettings,
    kill: &CancellationToken,
    done: &CancellationToken,
) -> Option<Trip> {
    let mut interval = tokio::time::interval_at(Instant::now() + settings.tick, settings.tick);
    let mut checks: u64 = 0;

    loop {
        tokio::select! {
            _ = done.cancelled() => return None,
            _ = interval.tick() => {
                checks += 1;
                if let Some(trip) = monitor.verdict(Instant::now(), settings) {
                    tracing::warn!("{}", trip);
                    kill.cancel();
                    return Some(trip);
                }
                if checks % 2 == 0 {
                    tracing::debug!(
                        "Watchdog check #{}: {} progress reports so far",
                        checks,
                        monitor.reports()
                    );
                }
            }
        }
    }
}
