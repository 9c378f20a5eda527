use crate::server::routes_api::{error_response, parse_task_id};
use crate::server::AppContext;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use reelforge_common::ProgressEvent;
use std::convert::Infallible;
use std::time::Duration;

pub const CONNECTED_MESSAGE: &str = "Connected to progress stream";

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/tasks/:id/progress", get(progress_handler))
}

/// Live progress for one task.
///
/// The first event is the stored task state. The subscription is taken
/// before that state is read, so nothing published in between is lost. For
/// a task that already finished the stream ends after the first event.
pub async fn progress_handler(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let id = parse_task_id(&id)?;

    let subscription = ctx.hubs.subscribe(id, ctx.config.hub.queue_capacity);
    let task = ctx.tasks.get(id).map_err(error_response)?;

    let connected = ProgressEvent::new(id, task.status, CONNECTED_MESSAGE)
        .with_frames(task.progress, task.current_frame, task.total_frames)
        .with_eta(task.eta);

    let live = if task.status.is_terminal() {
        tracing::debug!("Task {} already {}, sending snapshot only", id, task.status);
        drop(subscription);
        None
    } else {
        tracing::debug!("Progress subscriber {} attached to task {}", subscription.id(), id);
        Some(subscription)
    };

    let events = stream::once(async move { connected })
        .chain(stream::iter(live).flatten())
        .map(|event: ProgressEvent| {
            let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                format!(r#"{{"error": "serialization failed: {}"}}"#, e)
            });
            Ok(Event::default().data(data))
        });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
