//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`App`] over an in-memory database, with
//! every directory in a temp dir and shell scripts standing in for ffmpeg
//! and ffprobe. The [`TestHarness::with_server`] constructor starts Axum on
//! a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use reelforge::app::App;
use reelforge::config::Config;
use reelforge::server::{create_router, AppContext};
use reelforge_common::{TaskKind, TaskParams};
use reelforge_db::models::Task;
use reelforge_db::pool::{get_conn, init_memory_pool};
use reelforge_db::queries::tasks;
use tempfile::TempDir;

/// Reports a 10 second duration for any audio and accepts every input.
pub const FFPROBE: &str = r#"#!/bin/sh
case "$*" in
  *format=duration*) echo "10.000000" ;;
esac
exit 0
"#;

/// Two status lines, then writes the output file (the last argument).
pub const ENGINE_OK: &str = r#"#!/bin/sh
for last; do :; done
echo 'ffmpeg version stub' >&2
printf 'frame=  100 fps= 50 q=1.0 size=1kB time=00:00:04.00 bitrate=1.0kbits/s speed=2.0x\r' >&2
printf 'frame=  190 fps= 50 q=1.0 size=2kB time=00:00:07.60 bitrate=1.0kbits/s speed=2.0x\n' >&2
echo rendered > "$last"
"#;

pub const ENGINE_FAIL: &str = r#"#!/bin/sh
echo 'ffmpeg version stub' >&2
echo '[in] Error opening input file missing.jpg' >&2
echo 'Conversion failed!' >&2
exit 1
"#;

/// Never prints anything.
pub const ENGINE_SILENT: &str = r#"#!/bin/sh
exec sleep 30
"#;

pub struct TestHarness {
    pub app: App,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness whose encoder succeeds.
    pub fn new() -> Self {
        Self::with_engine(ENGINE_OK)
    }

    pub fn with_engine(engine: &str) -> Self {
        Self::with_config(engine, |_| {})
    }

    /// Harness with `engine` as ffmpeg and a config adjusted by `tweak`.
    pub fn with_config(engine: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let mut config = Config::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("outputs");
        config.storage.temp_dir = dir.path().join("temp");
        config.tools.ffmpeg_path = Some(write_script(&bin, "ffmpeg", engine));
        config.tools.ffprobe_path = Some(write_script(&bin, "ffprobe", FFPROBE));
        config.worker.poll_interval_ms = 50;
        tweak(&mut config);

        let pool = init_memory_pool().expect("failed to create in-memory pool");
        let app = App::build(config, pool).expect("failed to build app");

        Self { app, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let addr = harness.serve().await;
        (harness, addr)
    }

    pub async fn serve(&self) -> SocketAddr {
        let router = create_router(AppContext::from(&self.app));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        addr
    }

    /// Create an input file in the harness dir and return its path.
    pub fn input(&self, name: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"not really media").unwrap();
        path.to_string_lossy().to_string()
    }

    pub fn image_audio_params(&self) -> TaskParams {
        TaskParams {
            image_path: Some(self.input("cover.jpg")),
            audio_path: Some(self.input("track.mp3")),
            ..Default::default()
        }
    }

    pub fn slideshow_params(&self) -> TaskParams {
        TaskParams {
            image_paths: vec![self.input("a.jpg"), self.input("b.jpg"), self.input("c.jpg")],
            ..Default::default()
        }
    }

    /// Create a task through the service and claim it, as a worker would.
    pub async fn claimed(&self, kind: TaskKind, params: TaskParams) -> Task {
        let task = self.app.tasks.create(kind, params).await.expect("create");
        let conn = get_conn(&self.app.pool).unwrap();
        let claimed = tasks::claim_next_pending(&conn).unwrap().expect("claim");
        assert_eq!(claimed.id, task.id);
        claimed
    }

    pub fn task(&self, task: &Task) -> Task {
        self.app.tasks.get(task.id).expect("task")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.app.config.storage.output_dir.clone()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.app.config.storage.temp_dir.clone()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Files directly inside `dir`, or none when it does not exist.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
