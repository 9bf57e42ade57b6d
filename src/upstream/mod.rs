//! Upstream generative-content API.
//!
//! The relay talks to the upstream through the [`Generator`] trait so the
//! HTTP handler can be exercised without network access. [`GeminiClient`]
//! is the production implementation.

pub mod client;
pub mod convert;
pub mod models;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

pub use client::GeminiClient;
pub use models::{GenerateContentRequest, GenerateContentResponse};

/// Errors raised while calling the upstream API or reading its stream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Non-success status returned by the API.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/HTTP errors.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A streamed event that is not a valid response chunk.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Incremental responses of one generation.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<GenerateContentResponse, UpstreamError>> + Send>>;

/// A streaming content generator.
///
/// Returns boxed futures so the trait stays dyn-compatible
/// (`Arc<dyn Generator>` in the application state).
pub trait Generator: Send + Sync {
    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Start a streaming generation. Resolves once the upstream has accepted
    /// the request; the returned stream yields chunks as they arrive.
    fn stream_generate(
        &self,
        api_key: String,
        request: GenerateContentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseStream, UpstreamError>> + Send + '_>>;
}
