pub mod admin;
pub mod events;
pub mod health;
pub mod timeline;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::{AppState, Backends};

pub fn create_router<B: Backends>(state: AppState<B>) -> Router {
    Router::new()
        .merge(timeline::routes::<B>())
        .merge(events::routes::<B>())
        .merge(admin::routes::<B>())
        .merge(health::routes::<B>())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
