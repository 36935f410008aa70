use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use tidings_core::{EventBus, PostCreatedEvent, POST_CREATED_TOPIC};

use crate::error::ApiError;
use crate::state::{AppState, Backends};

pub fn routes<B: Backends>() -> Router<AppState<B>> {
    Router::new().route("/events/post-created", post(post_created::<B>))
}

/// Accept a post creation event from the post service and queue it for
/// fan-out.
async fn post_created<B: Backends>(
    State(state): State<AppState<B>>,
    Json(event): Json<PostCreatedEvent>,
) -> Result<StatusCode, ApiError> {
    tracing::debug!(author = %event.author_id, post_id = %event.post_id, "post created");
    let payload = event
        .to_json()
        .map_err(|e| ApiError::Encode(e.to_string()))?;
    state.bus.publish(POST_CREATED_TOPIC, payload).await?;
    Ok(StatusCode::ACCEPTED)
}
