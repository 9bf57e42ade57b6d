//! HTTP transport from the chat front-end to the relay.

use std::future::Future;
use std::pin::Pin;

use futures::{Stream, TryStreamExt};

use crate::models::{ErrorBody, FileData, Message, RelayRequest, StreamChunk};
use crate::net::{ChunkStream, HttpClient};

/// Path of the relay endpoint, relative to the relay base URL.
pub const RELAY_PATH: &str = "/api/gemini";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay answered with a non-success status.
    #[error("API request failed: {0}")]
    Api(String),

    /// Connection failure or a broken response body.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Decoded chunks of one response.
pub type ChunkResultStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ClientError>> + Send>>;

/// Opens response streams on behalf of the conversation.
///
/// Returns boxed futures so the conversation can hold a `&dyn ChatTransport`.
pub trait ChatTransport: Send + Sync {
    fn open_stream(
        &self,
        prompt: String,
        file: Option<FileData>,
        history: Vec<Message>,
        use_google_search: bool,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkResultStream, ClientError>> + Send + '_>>;
}

/// Relay client over HTTP.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: HttpClient,
    base_url: String,
}

impl RelayClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{RELAY_PATH}", self.base_url.trim_end_matches('/'))
    }

    /// POST the request and return the decoded NDJSON chunk stream.
    pub async fn send(&self, request: &RelayRequest) -> Result<ChunkResultStream, ClientError> {
        let response = self
            .http
            .inner()
            .post(self.endpoint())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .map(|b| b.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .map(str::to_string)
                        .unwrap_or_else(|| status.as_u16().to_string())
                });
            tracing::warn!(status = status.as_u16(), error = %message, "Relay rejected request");
            return Err(ClientError::Api(message));
        }

        let chunks = ChunkStream::new(response.bytes_stream()).map_err(ClientError::Network);
        Ok(Box::pin(chunks))
    }
}

impl ChatTransport for RelayClient {
    fn open_stream(
        &self,
        prompt: String,
        file: Option<FileData>,
        history: Vec<Message>,
        use_google_search: bool,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkResultStream, ClientError>> + Send + '_>> {
        Box::pin(async move {
            let request = RelayRequest {
                prompt,
                file,
                history,
                use_google_search,
            };
            self.send(&request).await
        })
    }
}
