use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use reelforge_av::WatchdogSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/reelforge.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Where uploaded inputs are saved
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where rendered videos are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Where remote inputs are downloaded before encoding
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Fail the task when uploading its output fails, instead of serving the
    /// local copy (default: false)
    #[serde(default)]
    pub fail_on_upload_error: bool,

    #[serde(default)]
    pub remote: Option<RemoteStorageConfig>,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/outputs")
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("./data/temp")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            fail_on_upload_error: false,
            remote: None,
        }
    }
}

/// HTTP object store that accepts `PUT {endpoint}/{bucket}/{key}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteStorageConfig {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub bucket: String,

    /// Sent as `Authorization: Bearer <token>`
    #[serde(default)]
    pub access_token: String,

    /// Public URL prefix objects are served from
    #[serde(default)]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Tasks processed in parallel (default: 10)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fallback poll interval when no creation wake-up arrives
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Hard deadline per task (default: 30 minutes)
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    10
}
fn default_poll_interval() -> u64 {
    2000
}
fn default_task_timeout() -> u64 {
    30 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    /// Quiet time allowed before the first progress line
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Time allowed without the frame counter advancing
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
}

fn default_tick() -> u64 {
    10
}
fn default_startup_timeout() -> u64 {
    60
}
fn default_stall_timeout() -> u64 {
    300
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            startup_timeout_secs: default_startup_timeout(),
            stall_timeout_secs: default_stall_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            tick: Duration::from_secs(self.tick_secs),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Events buffered per live subscriber before it is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
