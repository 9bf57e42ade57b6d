//! Gemini API client.
//!
//! Issues `streamGenerateContent` calls with `alt=sse` and turns the event
//! stream into [`GenerateContentResponse`] values.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use tracing::{debug, instrument};

use crate::config::UpstreamConfig;
use crate::net::{HttpClient, SseEvent, SseStream};
use crate::upstream::models::{ErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::upstream::{Generator, ResponseStream, UpstreamError};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini client bound to one model.
///
/// Holds no per-request state; one instance is shared by all relay requests.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: HttpClient,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Build a client with the timeouts and endpoint from configuration.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            HttpClient::for_upstream(config),
            config.base_url.clone(),
            config.model.clone(),
        )
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Start a streaming generation.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn stream_generate_content(
        &self,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream, UpstreamError> {
        debug!(
            api_key = %mask_token(api_key),
            turns = request.contents.len(),
            grounding = request.tools.is_some(),
            "Sending streamGenerateContent request"
        );

        let response = self
            .http
            .inner()
            .post(self.stream_url())
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        let events = SseStream::new(response.bytes_stream());
        Ok(Box::pin(
            events.filter_map(|event| async move { decode_event(event) }),
        ))
    }
}

impl Generator for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn stream_generate(
        &self,
        api_key: String,
        request: GenerateContentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseStream, UpstreamError>> + Send + '_>> {
        Box::pin(async move { self.stream_generate_content(&api_key, &request).await })
    }
}

/// Map one SSE event to a response chunk, skipping keep-alives and `[DONE]`.
fn decode_event(
    event: Result<SseEvent, reqwest::Error>,
) -> Option<Result<GenerateContentResponse, UpstreamError>> {
    match event {
        Ok(event) => {
            let data = event.data.trim();
            if data.is_empty() || data == "[DONE]" {
                return None;
            }
            Some(serde_json::from_str(data).map_err(UpstreamError::from))
        }
        Err(e) => Some(Err(UpstreamError::Network(e))),
    }
}

/// Build an API error, preferring the message from Google's error envelope.
fn api_error(status: u16, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.to_string()
            }
        });
    UpstreamError::Api { status, message }
}

/// Mask a credential for logging, keeping the first and last 4 characters.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 || !token.is_ascii() {
        return "***".to_string();
    }
    format!("{}***{}", &token[..4], &token[token.len() - 4..])
}
