use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::ErrorBody;
use crate::upstream::UpstreamError;

/// Relay-side error. Every variant renders as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The upstream credential is not configured.
    #[error("{env_var} environment variable not set on server.")]
    MissingCredential { env_var: String },

    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(#[from] UpstreamError),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            // Request-handling failures are all reported as 500, a malformed
            // body included.
            Self::MissingCredential { .. } | Self::BadRequest(_) | Self::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}
