use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::app::App;
use crate::config::Config;
use crate::hub::HubRegistry;
use crate::storage::BlobStorage;
use crate::tasks::TaskService;

pub mod routes_api;
pub mod routes_sse;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tasks: TaskService,
    pub hubs: HubRegistry,
    pub storage: Arc<dyn BlobStorage>,
}

impl From<&App> for AppContext {
    fn from(app: &App) -> Self {
        Self {
            config: app.config.clone(),
            tasks: app.tasks.clone(),
            hubs: app.hubs.clone(),
            storage: app.storage.clone(),
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // Rendered outputs and local uploads are always served, so local
    // fallback URLs resolve even when remote storage is configured
    let outputs = ServeDir::new(&ctx.config.storage.output_dir);
    let uploads = ServeDir::new(&ctx.config.storage.upload_dir);

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            routes_api::api_routes().merge(routes_sse::sse_routes()),
        )
        .nest_service("/api/outputs", outputs)
        .nest_service("/api/uploads", uploads)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Serve the API and run the task workers until a shutdown signal arrives.
pub async fn start_server(app: App) -> Result<()> {
    let config = app.config.clone();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    app.recover_orphans()?;

    let workers = tokio::spawn(app.worker_pool().run(app.shutdown.clone()));

    let router = create_router(AppContext::from(&app));

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = app.shutdown.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await;

    // Covers the case where serving failed before any signal
    app.shutdown.cancel();
    if let Err(e) = workers.await {
        tracing::error!("Worker pool panicked: {}", e);
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
