//! HTTP route table and server lifecycle.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::Orchestrator;
use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::session::SessionTracker;
use crate::workspace::WorkspaceStore;

use super::chat;
use super::fs;
use super::sessions;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub workspace: Arc<WorkspaceStore>,
    pub sessions: SessionTracker,
    pub orchestrator: Arc<Orchestrator>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let workspace = Arc::new(WorkspaceStore::open(&config.workspace_path).await?);
    tracing::info!("Workspace root: {}", workspace.root().display());

    let sessions = SessionTracker::new();
    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(
        config.api_key.clone(),
        config.api_url.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        Arc::clone(&workspace),
        sessions.clone(),
        config.models.clone(),
        config.max_context_bytes,
    ));

    let sweeper =
        sessions.spawn_cleanup_task(config.sessions.sweep_interval, config.sessions.max_age);

    let state = Arc::new(AppState {
        config: config.clone(),
        workspace,
        sessions,
        orchestrator,
    });

    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat::chat))
        .route("/api/save-files", post(fs::save_files))
        .route("/api/list-workspace-files", get(fs::list_workspace_files))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/:id", delete(sessions::delete_session))
        .route("/api/sessions/:id/changes", get(sessions::session_changes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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

/// Health check endpoint.
async fn health(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
