//! Task intake: validation, creation and lookup.

use std::sync::Arc;

use reelforge_av::MediaProber;
use reelforge_common::{Error, Result, TaskId, TaskKind, TaskParams};
use reelforge_db::models::Task;
use reelforge_db::pool::{get_conn, DbPool};
use reelforge_db::queries::tasks;
use serde::Serialize;
use tokio::sync::Notify;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of tasks, newest first.
#[derive(Debug, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Clamp paging input: `page >= 1`, `page_size` in `1..=100` else the
/// default.
pub fn normalize_paging(page: Option<u32>, page_size: Option<u32>) -> (u32, u32) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let page_size = page_size
        .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

#[derive(Clone)]
pub struct TaskService {
    pool: DbPool,
    prober: Arc<dyn MediaProber>,
    wake: Arc<Notify>,
}

impl TaskService {
    /// `wake` is signalled after every creation so idle workers pick the
    /// task up without waiting for their next poll.
    pub fn new(pool: DbPool, prober: Arc<dyn MediaProber>, wake: Arc<Notify>) -> Self {
        Self { pool, prober, wake }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Validate `params` and queue a new pending task.
    ///
    /// Rejected parameters never produce a task.
    pub async fn create(&self, kind: TaskKind, params: TaskParams) -> Result<Task> {
        validate_params(self.prober.as_ref(), kind, &params).await?;

        let conn = get_conn(&self.pool)?;
        let task = tasks::create_task(&conn, kind, &params)?;
        drop(conn);

        tracing::info!("Created {} task {}", kind, task.id);
        self.wake.notify_one();
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        let conn = get_conn(&self.pool)?;
        tasks::get_task(&conn, id)
    }

    pub fn list(&self, page: Option<u32>, page_size: Option<u32>) -> Result<TaskPage> {
        let (page, page_size) = normalize_paging(page, page_size);
        let conn = get_conn(&self.pool)?;
        let (tasks, total) = tasks::list_tasks(&conn, page, page_size)?;
        Ok(TaskPage {
            tasks,
            total,
            page,
            page_size,
        })
    }
}

/// Check that the inputs `kind` needs are present and that every referenced
/// media file is readable by the prober.
pub async fn validate_params(
    prober: &dyn MediaProber,
    kind: TaskKind,
    params: &TaskParams,
) -> Result<()> {
    match kind {
        TaskKind::ImageAudioToVideo => {
            let image = params
                .image_path()
                .ok_or_else(|| Error::invalid_input("image_path is required"))?;
            let audio = params
                .audio_path()
                .ok_or_else(|| Error::invalid_input("audio_path is required"))?;
            check(prober, image, "invalid image file").await?;
            check(prober, audio, "invalid audio file").await?;
        }
        TaskKind::ImageSlideshow => {
            let images = params.slideshow_images();
            if images.is_empty() {
                return Err(Error::invalid_input(
                    "image_paths must contain at least one image",
                ));
            }
            for (index, image) in images.iter().enumerate() {
                check(
                    prober,
                    image,
                    &format!("invalid image file at index {}", index),
                )
                .await?;
            }
            if let Some(audio) = params.background_audio() {
                check(prober, audio, "invalid background audio file").await?;
            }
        }
    }
    Ok(())
}

async fn check(prober: &dyn MediaProber, reference: &str, what: &str) -> Result<()> {
    match prober.validate(reference).await {
        Ok(()) => Ok(()),
        Err(e @ reelforge_av::Error::ToolNotFound { .. }) => Err(Error::internal(e.to_string())),
        Err(e) => Err(Error::invalid_input(format!(
            "validation failed: {}: {}",
            what, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use reelforge_av::MediaInfo;
    use reelforge_common::TaskStatus;
    use reelforge_db::pool::init_memory_pool;
    use std::path::Path;

    /// Accepts everything except references containing "bad".
    struct PickyProber;

    #[async_trait]
    impl MediaProber for PickyProber {
        async fn probe(&self, _path: &Path) -> reelforge_av::Result<MediaInfo> {
            unimplemented!()
        }

        async fn validate(&self, reference: &str) -> reelforge_av::Result<()> {
            if reference.contains("bad") {
                Err(reelforge_av::Error::InvalidInput(format!(
                    "{reference}: Invalid data found when processing input"
                )))
            } else {
                Ok(())
            }
        }

        async fn audio_duration(&self, _path: &Path) -> reelforge_av::Result<f64> {
            Ok(10.0)
        }
    }

    fn service() -> (TaskService, Arc<Notify>) {
        let wake = Arc::new(Notify::new());
        let service = TaskService::new(
            init_memory_pool().unwrap(),
            Arc::new(PickyProber),
            wake.clone(),
        );
        (service, wake)
    }

    fn image_audio(image: &str, audio: &str) -> TaskParams {
        TaskParams {
            image_path: Some(image.into()),
            audio_path: Some(audio.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_paging() {
        assert_eq!(normalize_paging(None, None), (1, 20));
        assert_eq!(normalize_paging(Some(0), Some(0)), (1, 20));
        assert_eq!(normalize_paging(Some(3), Some(100)), (3, 100));
        assert_eq!(normalize_paging(Some(2), Some(101)), (2, 20));
    }

    #[tokio::test]
    async fn test_create_queues_pending_task_and_wakes() {
        let (service, wake) = service();
        let task = service
            .create(
                TaskKind::ImageAudioToVideo,
                image_audio("cat.jpg", "purr.mp3"),
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(service.get(task.id).unwrap().id, task.id);
        // The stored permit completes immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), wake.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_inputs_rejected() {
        let (service, _) = service();
        let err = service
            .create(TaskKind::ImageAudioToVideo, image_audio("cat.jpg", " "))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidInput(ref m) if m.contains("audio_path"));

        let err = service
            .create(TaskKind::ImageSlideshow, TaskParams::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidInput(_));
        assert_eq!(service.list(None, None).unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_unreadable_media_rejected() {
        let (service, _) = service();
        let params = TaskParams {
            image_paths: vec!["a.jpg".into(), "bad.jpg".into()],
            ..Default::default()
        };
        let err = service
            .create(TaskKind::ImageSlideshow, params)
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidInput(ref m) if m.contains("index 1"));

        let params = TaskParams {
            image_paths: vec!["a.jpg".into()],
            background_audio: Some("bad.mp3".into()),
            ..Default::default()
        };
        let err = service
            .create(TaskKind::ImageSlideshow, params)
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidInput(ref m) if m.contains("background audio"));
    }

    #[tokio::test]
    async fn test_list_pages() {
        let (service, _) = service();
        for _ in 0..3 {
            service
                .create(TaskKind::ImageAudioToVideo, image_audio("a.jpg", "b.mp3"))
                .await
                .unwrap();
        }

        let page = service.list(Some(2), Some(2)).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.tasks.len(), 1);
        assert_eq!((page.page, page.page_size), (2, 2));
    }

    #[test]
    fn test_get_unknown_task() {
        let (service, _) = service();
        assert!(service.get(TaskId::new()).unwrap_err().is_not_found());
    }
}
