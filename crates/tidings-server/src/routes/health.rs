use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::{AppState, Backends};

pub fn routes<B: Backends>() -> Router<AppState<B>> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn ready() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ready" })
}
