use crate::server::AppContext;
use crate::storage::upload_key;
use crate::tasks::TaskPage;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use reelforge_common::{TaskId, TaskKind, TaskParams};
use reelforge_db::models::Task;
use serde::{Deserialize, Serialize};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

/// Map a service error onto an HTTP status.
pub(crate) fn error_response(e: reelforge_common::Error) -> (StatusCode, String) {
    use reelforge_common::Error;
    match e {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "task not found".to_string()),
        Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        other => {
            tracing::error!("Request failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub(crate) fn parse_task_id(raw: &str) -> Result<TaskId, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::NOT_FOUND, "task not found".to_string()))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    #[serde(rename = "type")]
    kind: TaskKind,
    input_params: TaskParams,
}

async fn create_task(
    State(ctx): State<AppContext>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), (StatusCode, String)> {
    let Json(request) = payload.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;

    let task = ctx
        .tasks
        .create(request.kind, request.input_params)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// Paging parameters arrive as text so malformed values fall back to the
/// defaults instead of failing the request.
#[derive(Deserialize)]
struct ListTasksQuery {
    page: Option<String>,
    page_size: Option<String>,
}

async fn list_tasks(
    State(ctx): State<AppContext>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskPage>, (StatusCode, String)> {
    let page = query.page.and_then(|p| p.trim().parse().ok());
    let page_size = query.page_size.and_then(|s| s.trim().parse().ok());
    ctx.tasks
        .list(page, page_size)
        .map(Json)
        .map_err(error_response)
}

async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Task>, (StatusCode, String)> {
    let id = parse_task_id(&id)?;
    ctx.tasks.get(id).map(Json).map_err(error_response)
}

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    path: String,
    url: String,
}

async fn upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e))
    };

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(bad_request)?;
        file = Some((original, data));
        break;
    }

    let Some((original, data)) = file else {
        return Err((StatusCode::BAD_REQUEST, "no file uploaded".to_string()));
    };

    let filename = format!(
        "{}_{}",
        chrono::Utc::now().timestamp(),
        sanitize_file_name(&original)
    );

    let internal = |e: anyhow::Error| {
        tracing::error!("Upload failed: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    };

    let local_path = ctx
        .storage
        .save_local(&filename, &data)
        .await
        .map_err(internal)?;

    let url = if ctx.storage.is_remote() {
        let url = ctx
            .storage
            .upload(&local_path, &upload_key(&filename))
            .await
            .map_err(internal)?;
        if let Err(e) = ctx.storage.delete_local(&local_path).await {
            tracing::warn!("Failed to delete local upload {:?}: {:#}", local_path, e);
        }
        url
    } else {
        format!("/api/{}", upload_key(&filename))
    };

    tracing::info!("Stored upload {} ({} bytes)", filename, data.len());

    Ok(Json(UploadResponse {
        filename,
        path: local_path.to_string_lossy().to_string(),
        url,
    }))
}

/// Keep only the final path component and drop characters that would
/// escape the upload directory.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "upload".to_string(),
        rest => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("cat.jpg"), "cat.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\photos\\dog.png"), "dog.png");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
    }

    #[test]
    fn test_error_response_statuses() {
        use reelforge_common::Error;
        assert_eq!(
            error_response(Error::not_found("task x")).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(Error::invalid_input("image_path is required")),
            (
                StatusCode::BAD_REQUEST,
                "image_path is required".to_string()
            )
        );
        assert_eq!(
            error_response(Error::database("locked")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_parse_task_id() {
        let id = TaskId::new();
        assert_eq!(parse_task_id(&id.to_string()).unwrap(), id);
        assert_eq!(
            parse_task_id("not-a-uuid").unwrap_err().0,
            StatusCode::NOT_FOUND
        );
    }
}
