//! Wiring: turns a [`Config`] into the running components.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use reelforge_av::{get_tool_path, CommandBuilder, Ffprobe, MediaProber, Supervisor};
use reelforge_db::pool::{get_conn, DbPool};
use reelforge_db::queries::tasks;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::fetch::Downloader;
use crate::hub::HubRegistry;
use crate::orchestrator::{Orchestrator, WorkerPool};
use crate::storage::{self, BlobStorage};
use crate::tasks::TaskService;

/// Message stored on tasks a previous process left running.
pub const INTERRUPTED_MESSAGE: &str = "Task interrupted by service restart";

/// Configured ffmpeg/ffprobe locations.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    /// Resolve both tools, falling back to the bare name so that a missing
    /// tool surfaces as a task failure rather than a startup failure.
    pub fn resolve(config: &Config) -> Self {
        let resolve = |name: &str, configured: Option<&std::path::Path>| {
            get_tool_path(name, configured).unwrap_or_else(|e| {
                tracing::warn!("{}; tasks will fail until it is installed", e);
                configured
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(name))
            })
        };
        Self {
            ffmpeg: resolve("ffmpeg", config.tools.ffmpeg_path.as_deref()),
            ffprobe: resolve("ffprobe", config.tools.ffprobe_path.as_deref()),
        }
    }
}

/// Every long-lived component, shared by the server, the workers and the
/// one-shot CLI runner.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub pool: DbPool,
    pub hubs: HubRegistry,
    pub storage: Arc<dyn BlobStorage>,
    pub tasks: TaskService,
    pub orchestrator: Orchestrator,
    pub wake: Arc<Notify>,
    pub shutdown: CancellationToken,
}

impl App {
    pub fn build(config: Config, pool: DbPool) -> Result<Self> {
        let tools = ToolPaths::resolve(&config);
        tracing::debug!("Using ffmpeg at {:?}, ffprobe at {:?}", tools.ffmpeg, tools.ffprobe);

        let storage = storage::from_config(&config.storage).context("Failed to set up storage")?;
        let prober: Arc<dyn MediaProber> = Arc::new(Ffprobe::new(&tools.ffprobe));
        let downloader = Downloader::new(&config.storage.temp_dir, &config.download);
        let builder = CommandBuilder::new(Arc::new(downloader), prober.clone());
        let supervisor = Supervisor::new(&tools.ffmpeg, config.watchdog.settings());

        let hubs = HubRegistry::new();
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let orchestrator = Orchestrator::new(
            pool.clone(),
            hubs.clone(),
            builder,
            supervisor,
            storage.clone(),
        )
        .with_task_timeout(config.worker.task_timeout())
        .with_fail_on_upload_error(config.storage.fail_on_upload_error)
        .with_shutdown(shutdown.clone());

        let tasks = TaskService::new(pool.clone(), prober, wake.clone());

        Ok(Self {
            config: Arc::new(config),
            pool,
            hubs,
            storage,
            tasks,
            orchestrator,
            wake,
            shutdown,
        })
    }

    /// Mark tasks a previous process left `processing` as failed.
    pub fn recover_orphans(&self) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        let count = tasks::fail_orphaned_tasks(&conn, INTERRUPTED_MESSAGE)?;
        if count > 0 {
            tracing::warn!("Marked {} interrupted task(s) as failed", count);
        }
        Ok(count)
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.orchestrator.clone(),
            self.wake.clone(),
            self.config.worker.concurrency,
            self.config.worker.poll_interval(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_common::{TaskKind, TaskParams, TaskStatus};
    use reelforge_db::pool::init_memory_pool;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.upload_dir = dir.join("uploads");
        config.storage.output_dir = dir.join("outputs");
        config.storage.temp_dir = dir.join("temp");
        config
    }

    #[tokio::test]
    async fn test_build_creates_storage_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(config(dir.path()), init_memory_pool().unwrap()).unwrap();

        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("outputs").is_dir());
        assert!(!app.storage.is_remote());
    }

    #[tokio::test]
    async fn test_recover_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(config(dir.path()), init_memory_pool().unwrap()).unwrap();

        let conn = get_conn(&app.pool).unwrap();
        let task = tasks::create_task(&conn, TaskKind::ImageSlideshow, &TaskParams::default())
            .unwrap();
        tasks::claim_next_pending(&conn).unwrap();
        drop(conn);

        assert_eq!(app.recover_orphans().unwrap(), 1);
        let task = app.tasks.get(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message, INTERRUPTED_MESSAGE);
    }
}
