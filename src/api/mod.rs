pub mod health;
pub mod relay;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};

use crate::AppState;

/// Build the relay router.
///
/// Route layout:
/// ```text
/// /health        GET
/// /api/gemini    POST   (other methods answer 405)
/// ```
pub fn build_api_router(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/gemini",
            any(relay::relay_chat).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
}
