use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    /// Whether an upstream API key is currently resolvable.
    pub credential_configured: bool,
}

/// GET /health
///
/// Reports liveness and the model relay requests go to. The credential is
/// re-resolved here, so the flag reflects the current environment.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.generator.model().to_string(),
        credential_configured: state.config.upstream.resolve_api_key().is_some(),
    })
}
