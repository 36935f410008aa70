//! Tidings Server - Axum service for home timelines.

pub mod config;
pub mod dead_letters;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use dead_letters::DeadLetterRecorder;
pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, Backends, Production};
