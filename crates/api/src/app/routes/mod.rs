use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod system;
pub mod webhooks;

/// Router for every endpoint; shared state is attached by `build_app`.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/health/live", get(system::live))
        .route("/metrics", get(system::metrics))
        .route("/webhooks/meetings", post(webhooks::receive))
        .nest("/jobs", jobs::router())
}
