use axum::{extract::State, routing::post, Json, Router};

use tidings_engine::TrimStats;

use crate::error::ApiError;
use crate::state::{AppState, Backends};

pub fn routes<B: Backends>() -> Router<AppState<B>> {
    Router::new().route("/admin/trim", post(trim_all::<B>))
}

/// Run one trim pass now instead of waiting for the schedule.
async fn trim_all<B: Backends>(
    State(state): State<AppState<B>>,
) -> Result<Json<TrimStats>, ApiError> {
    let stats = state.trimmer.trim_all().await?;
    Ok(Json(stats))
}
