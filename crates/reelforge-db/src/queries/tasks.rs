//! Task query operations.
//!
//! Every write that changes a task is guarded by its current status, so a
//! task that reached `completed` or `failed` is never modified again and a
//! status can never move backwards.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use reelforge_common::{Error, Result, TaskId, TaskKind, TaskParams, TaskStatus};

use crate::models::{ProgressUpdate, Task, TaskCompletion, TaskFailure};

const TASK_COLUMNS: &str = "id, kind, status, progress, current_frame, total_frames, eta, params,
     command, filter_graph, log, error_message, output_file, output_url, created_at, updated_at";

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: String = row.get(idx)?;
    value
        .parse()
        .map_err(|e: T::Err| conversion_error(idx, e.to_string()))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn counter(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let params: String = row.get(7)?;
    let params: TaskParams =
        serde_json::from_str(&params).map_err(|e| conversion_error(7, e.to_string()))?;

    Ok(Task {
        id: parse_text(row, 0)?,
        kind: parse_text(row, 1)?,
        status: parse_text(row, 2)?,
        progress: row.get(3)?,
        current_frame: counter(row, 4)?,
        total_frames: counter(row, 5)?,
        eta: row.get::<_, Option<i64>>(6)?.map(|v| v.max(0) as u64),
        params,
        command: row.get(8)?,
        filter_graph: row.get(9)?,
        log: row.get(10)?,
        error_message: row.get(11)?,
        output_file: row.get(12)?,
        output_url: row.get(13)?,
        created_at: parse_time(row, 14)?,
        updated_at: parse_time(row, 15)?,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

/// Insert a new pending task.
pub fn create_task(conn: &Connection, kind: TaskKind, params: &TaskParams) -> Result<Task> {
    let id = TaskId::new();
    let now = Utc::now();
    let params_json = serde_json::to_string(params)
        .map_err(|e| Error::invalid_input(format!("unserializable parameters: {}", e)))?;

    conn.execute(
        "INSERT INTO tasks (id, kind, status, params, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            id.to_string(),
            kind.to_string(),
            TaskStatus::Pending.to_string(),
            params_json,
            timestamp(now),
            timestamp(now),
        ],
    )
    .map_err(db_err)?;

    get_task(conn, id)
}

/// Get a task by ID.
pub fn get_task(conn: &Connection, id: TaskId) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
        [id.to_string()],
        task_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found(format!("task {}", id)),
        _ => db_err(e),
    })
}

/// List tasks newest first. `page` is 1-based.
///
/// Returns the page of tasks and the total number of tasks.
pub fn list_tasks(conn: &Connection, page: u32, page_size: u32) -> Result<(Vec<Task>, u64)> {
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
        .map_err(db_err)?;

    let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            TASK_COLUMNS
        ))
        .map_err(db_err)?;

    let tasks = stmt
        .query_map(params![i64::from(page_size), offset], task_from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok((tasks, total.max(0) as u64))
}

/// Atomically move the oldest pending task to `processing` and return it.
pub fn claim_next_pending(conn: &Connection) -> Result<Option<Task>> {
    let claimed: Option<String> = conn
        .query_row(
            "UPDATE tasks SET status = 'processing', updated_at = ?
             WHERE id = (
                 SELECT id FROM tasks WHERE status = 'pending'
                 ORDER BY created_at ASC, rowid ASC LIMIT 1
             ) AND status = 'pending'
             RETURNING id",
            [timestamp(Utc::now())],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;

    match claimed {
        Some(id) => {
            let id: TaskId = id
                .parse()
                .map_err(|e| Error::database(format!("corrupt task id {}: {}", id, e)))?;
            get_task(conn, id).map(Some)
        }
        None => Ok(None),
    }
}

/// Fold the latest progress snapshot into a processing task.
///
/// Returns false when the task is no longer processing.
pub fn update_task_progress(conn: &Connection, id: TaskId, update: &ProgressUpdate) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE tasks SET progress = ?, current_frame = ?, total_frames = ?, eta = ?,
                 updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![
                update.progress,
                update.current_frame as i64,
                update.total_frames as i64,
                update.eta.map(|v| v as i64),
                timestamp(Utc::now()),
                id.to_string(),
            ],
        )
        .map_err(db_err)?;

    Ok(affected > 0)
}

/// Mark a processing task completed and store its execution record.
pub fn complete_task(conn: &Connection, id: TaskId, done: &TaskCompletion) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE tasks SET status = 'completed', progress = 100, current_frame = ?,
                 total_frames = ?, eta = 0, command = ?, filter_graph = ?, log = ?,
                 output_file = ?, output_url = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![
                done.total_frames as i64,
                done.total_frames as i64,
                done.command,
                done.filter_graph,
                done.log,
                done.output_file,
                done.output_url,
                timestamp(Utc::now()),
                id.to_string(),
            ],
        )
        .map_err(db_err)?;

    Ok(affected > 0)
}

/// Mark a non-terminal task failed with whatever diagnostics exist.
pub fn fail_task(conn: &Connection, id: TaskId, failure: &TaskFailure) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE tasks SET status = 'failed', command = ?, filter_graph = ?, log = ?,
                 error_message = ?, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'processing')",
            params![
                failure.command,
                failure.filter_graph,
                failure.log,
                failure.error_message,
                timestamp(Utc::now()),
                id.to_string(),
            ],
        )
        .map_err(db_err)?;

    Ok(affected > 0)
}

/// Fail every task left `processing` by a previous process.
///
/// Returns the number of tasks failed.
pub fn fail_orphaned_tasks(conn: &Connection, error_message: &str) -> Result<usize> {
    conn.execute(
        "UPDATE tasks SET status = 'failed', error_message = ?, updated_at = ?
         WHERE status = 'processing'",
        params![error_message, timestamp(Utc::now())],
    )
    .map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{init_memory_pool, PooledConnection};

    fn setup_test_db() -> PooledConnection {
        let pool = init_memory_pool().unwrap();
        pool.get().unwrap()
    }

    fn slideshow_params() -> TaskParams {
        TaskParams {
            image_paths: vec!["a.jpg".into(), "b.jpg".into()],
            fps: Some(30),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_task() {
        let conn = setup_test_db();
        let task = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.kind, TaskKind::ImageSlideshow);
        assert_eq!(task.progress, 0.0);
        assert_eq!(task.eta, None);
        assert!(task.command.is_empty());

        let fetched = get_task(&conn, task.id).unwrap();
        assert_eq!(fetched, task);
        assert_eq!(fetched.params.fps(), 30);
    }

    #[test]
    fn test_get_missing_task() {
        let conn = setup_test_db();
        let err = get_task(&conn, TaskId::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_tasks_newest_first_with_paging() {
        let conn = setup_test_db();
        let ids: Vec<TaskId> = (0..5)
            .map(|_| {
                create_task(&conn, TaskKind::ImageAudioToVideo, &TaskParams::default())
                    .unwrap()
                    .id
            })
            .collect();

        let (first, total) = list_tasks(&conn, 1, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let (last, _) = list_tasks(&conn, 3, 2).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, ids[0]);
    }

    #[test]
    fn test_claim_is_fifo_and_exclusive() {
        let conn = setup_test_db();
        let first = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();
        let second = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();

        let claimed = claim_next_pending(&conn).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, TaskStatus::Processing);

        let claimed = claim_next_pending(&conn).unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(claim_next_pending(&conn).unwrap().is_none());
    }

    #[test]
    fn test_progress_only_applies_while_processing() {
        let conn = setup_test_db();
        let task = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();
        let update = ProgressUpdate {
            progress: 40.0,
            current_frame: 80,
            total_frames: 200,
            eta: Some(6),
        };

        // Still pending
        assert!(!update_task_progress(&conn, task.id, &update).unwrap());

        claim_next_pending(&conn).unwrap();
        assert!(update_task_progress(&conn, task.id, &update).unwrap());

        let stored = get_task(&conn, task.id).unwrap();
        assert_eq!(stored.progress, 40.0);
        assert_eq!(stored.current_frame, 80);
        assert_eq!(stored.total_frames, 200);
        assert_eq!(stored.eta, Some(6));
    }

    #[test]
    fn test_complete_task_records_execution() {
        let conn = setup_test_db();
        let task = create_task(&conn, TaskKind::ImageAudioToVideo, &TaskParams::default()).unwrap();
        claim_next_pending(&conn).unwrap();

        let done = TaskCompletion {
            command: "ffmpeg -i cat.jpg".into(),
            filter_graph: "scale=640:360".into(),
            log: "frame=250".into(),
            output_file: "/out/x.mp4".into(),
            output_url: "/api/outputs/x.mp4".into(),
            total_frames: 250,
        };
        assert!(complete_task(&conn, task.id, &done).unwrap());

        let stored = get_task(&conn, task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.progress, 100.0);
        assert_eq!(stored.current_frame, 250);
        assert_eq!(stored.total_frames, 250);
        assert_eq!(stored.command, "ffmpeg -i cat.jpg");
        assert_eq!(stored.output_url, "/api/outputs/x.mp4");
    }

    #[test]
    fn test_terminal_task_is_never_modified() {
        let conn = setup_test_db();
        let task = create_task(&conn, TaskKind::ImageAudioToVideo, &TaskParams::default()).unwrap();
        claim_next_pending(&conn).unwrap();

        assert!(fail_task(&conn, task.id, &TaskFailure::message("boom")).unwrap());

        let done = TaskCompletion::default();
        assert!(!complete_task(&conn, task.id, &done).unwrap());
        assert!(!fail_task(&conn, task.id, &TaskFailure::message("again")).unwrap());
        let update = ProgressUpdate {
            progress: 10.0,
            current_frame: 1,
            total_frames: 10,
            eta: None,
        };
        assert!(!update_task_progress(&conn, task.id, &update).unwrap());

        let stored = get_task(&conn, task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_message, "boom");
    }

    #[test]
    fn test_fail_orphaned_tasks() {
        let conn = setup_test_db();
        let orphan = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();
        let waiting = create_task(&conn, TaskKind::ImageSlideshow, &slideshow_params()).unwrap();
        claim_next_pending(&conn).unwrap();

        assert_eq!(fail_orphaned_tasks(&conn, "interrupted").unwrap(), 1);

        assert_eq!(get_task(&conn, orphan.id).unwrap().status, TaskStatus::Failed);
        assert_eq!(get_task(&conn, waiting.id).unwrap().status, TaskStatus::Pending);
    }
}
