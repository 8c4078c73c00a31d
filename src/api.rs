//! Ambient health/status HTTP surface (§9 ambient stack). No embedded
//! frontend — the Walker has no UI of its own, just a liveness probe and a
//! roster/load snapshot for operators.

use crate::store::CoordinationStore;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct ApiState {
    pub store: Arc<CoordinationStore>,
    pub dog_names: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: i64,
    dogs: Vec<DogLoad>,
}

#[derive(Serialize)]
struct DogLoad {
    name: String,
    active_tasks: usize,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let mut dogs = Vec::with_capacity(state.dog_names.len());
    for name in &state.dog_names {
        let active_tasks = state.store.active_task_count(name).await.unwrap_or(0);
        dogs.push(DogLoad { name: name.clone(), active_tasks });
    }

    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: chrono::Utc::now().signed_duration_since(state.started_at).num_seconds(),
        dogs,
    })
}

pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "status HTTP surface listening");

    Ok(tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!(%error, "status HTTP server exited");
        }
    }))
}
