use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidings_core::{PageCursor, Post, UserId};

use crate::error::ApiError;
use crate::state::{AppState, Backends};

pub fn routes<B: Backends>() -> Router<AppState<B>> {
    Router::new().route("/timeline/{reader_id}", get(get_timeline::<B>))
}

#[derive(Deserialize)]
struct TimelineParams {
    size: Option<usize>,
    cursor: Option<String>,
}

#[derive(Serialize)]
struct PostResponse {
    /// Snowflake ids exceed the safe integer range of JSON numbers.
    id: String,
    author_id: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        Self {
            id: post.id.to_string(),
            author_id: post.author_id.0,
            content: post.content,
            created_at: post.created_at,
        }
    }
}

#[derive(Serialize)]
struct TimelineResponse {
    items: Vec<PostResponse>,
    size: usize,
    next_cursor: Option<String>,
    has_next: bool,
}

async fn get_timeline<B: Backends>(
    State(state): State<AppState<B>>,
    Path(reader_id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<TimelineResponse>, ApiError> {
    let cursor = match params.cursor.as_deref() {
        Some(token) if !token.is_empty() => Some(PageCursor::decode(token)?),
        _ => None,
    };
    let size = params
        .size
        .unwrap_or(state.assembler.settings().default_page_size);

    let page = state
        .assembler
        .get_timeline(&UserId::new(reader_id), size, cursor)
        .await?;

    let items: Vec<PostResponse> = page.items.into_iter().map(Into::into).collect();
    Ok(Json(TimelineResponse {
        size: items.len(),
        items,
        next_cursor: page.next_cursor.map(|c| c.encode()),
        has_next: page.has_next,
    }))
}
