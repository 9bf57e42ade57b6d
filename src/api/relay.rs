use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Method, header};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::models::RelayRequest;
use crate::upstream::convert::{build_request, to_stream_chunk};
use crate::upstream::{ResponseStream, UpstreamError};

/// `/api/gemini`
///
/// Accepts a [`RelayRequest`] and answers with the upstream generation
/// re-encoded as newline-delimited JSON, one `StreamChunk` per line.
/// Non-POST methods get 405.
pub async fn relay_chat(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Result<Response, AppError> {
    if method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    let upstream = &state.config.upstream;
    let Some(api_key) = upstream.resolve_api_key() else {
        tracing::error!(env_var = %upstream.api_key_env, "Upstream API key is not configured");
        return Err(AppError::MissingCredential {
            env_var: upstream.api_key_env.clone(),
        });
    };

    let request_id = Uuid::new_v4().to_string();
    match open_stream(&state, api_key, &body).await {
        Ok(chunks) => {
            tracing::info!(
                request_id = %request_id,
                model = %state.generator.model(),
                "Relay stream opened"
            );
            Ok(ndjson_response(RelayStream::new(chunks, request_id)))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Error in relay route");
            Err(e)
        }
    }
}

async fn open_stream(
    state: &AppState,
    api_key: String,
    body: &[u8],
) -> Result<ResponseStream, AppError> {
    let request: RelayRequest = serde_json::from_slice(body)?;
    let upstream_request = build_request(&request);
    tracing::debug!(
        history = request.history.len(),
        has_file = request.file.is_some(),
        grounding = request.use_google_search,
        "Relay request parsed"
    );
    Ok(state
        .generator
        .stream_generate(api_key, upstream_request)
        .await?)
}

fn ndjson_response(stream: RelayStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// RelayStream
// ---------------------------------------------------------------------------

/// Encodes upstream responses as NDJSON lines and logs a summary when the
/// upstream stream ends.
///
/// An upstream error mid-stream is passed through as a body error, which
/// aborts the HTTP response. Nothing is emitted after it.
struct RelayStream {
    inner: ResponseStream,
    request_id: String,
    start: Instant,
    chunks: usize,
    sources: usize,
    done: bool,
}

impl RelayStream {
    fn new(inner: ResponseStream, request_id: String) -> Self {
        Self {
            inner,
            request_id,
            start: Instant::now(),
            chunks: 0,
            sources: 0,
            done: false,
        }
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(response))) => {
                let chunk = to_stream_chunk(&response);
                this.chunks += 1;
                this.sources += chunk.sources.as_ref().map_or(0, Vec::len);
                let mut line = match serde_json::to_vec(&chunk) {
                    Ok(line) => line,
                    Err(e) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e.into())));
                    }
                };
                line.push(b'\n');
                Poll::Ready(Some(Ok(Bytes::from(line))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                tracing::error!(
                    request_id = %this.request_id,
                    chunks = this.chunks,
                    error = %e,
                    "Upstream stream failed"
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                tracing::info!(
                    request_id = %this.request_id,
                    chunks = this.chunks,
                    sources = this.sources,
                    latency_ms = this.start.elapsed().as_millis() as u64,
                    "Relay stream complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{FileData, Message, StreamChunk};
    use crate::upstream::{GenerateContentRequest, GenerateContentResponse, Generator};
    use axum::http::{Request, StatusCode};
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Plays back canned upstream responses and records what it was asked.
    #[derive(Default)]
    struct ScriptedGenerator {
        responses: Vec<serde_json::Value>,
        fail_after: Option<String>,
        reject: Option<String>,
        seen: Mutex<Vec<(String, GenerateContentRequest)>>,
    }

    impl Generator for ScriptedGenerator {
        fn model(&self) -> &str {
            "gemini-test"
        }

        fn stream_generate(
            &self,
            api_key: String,
            request: GenerateContentRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ResponseStream, UpstreamError>> + Send + '_>>
        {
            self.seen.lock().unwrap().push((api_key, request));
            Box::pin(async move {
                if let Some(message) = &self.reject {
                    return Err(UpstreamError::Api {
                        status: 400,
                        message: message.clone(),
                    });
                }
                let mut items: Vec<Result<GenerateContentResponse, UpstreamError>> = self
                    .responses
                    .iter()
                    .map(|v| Ok(serde_json::from_value(v.clone()).unwrap()))
                    .collect();
                if let Some(message) = &self.fail_after {
                    items.push(Err(UpstreamError::Api {
                        status: 500,
                        message: message.clone(),
                    }));
                }
                let stream: ResponseStream = Box::pin(futures::stream::iter(items));
                Ok(stream)
            })
        }
    }

    fn text_response(text: &str) -> serde_json::Value {
        serde_json::json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
    }

    fn config(api_key: Option<&str>) -> Config {
        let mut config = Config::default();
        config.upstream.api_key_env = "CHATRELAY_TEST_RELAY_KEY_NEVER_SET".into();
        config.upstream.api_key = api_key.map(String::from);
        config
    }

    fn app(config: Config, generator: Arc<ScriptedGenerator>) -> axum::Router {
        crate::api::build_api_router(1024 * 1024).with_state(AppState::new(config, generator))
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/gemini")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let generator = Arc::new(ScriptedGenerator::default());
        let response = app(config(Some("k")), generator.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/gemini")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_string(response).await, r#"{"error":"Method not allowed"}"#);
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let generator = Arc::new(ScriptedGenerator::default());
        let response = app(config(None), generator.clone())
            .oneshot(post(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body["error"],
            "CHATRELAY_TEST_RELAY_KEY_NEVER_SET environment variable not set on server."
        );
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streams_ndjson_lines() {
        let generator = Arc::new(ScriptedGenerator {
            responses: vec![
                text_response("Hel"),
                serde_json::json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": "lo" }] },
                        "groundingMetadata": { "groundingChunks": [
                            { "web": { "uri": "https://a.example", "title": "A" } },
                            { "web": { "uri": "https://untitled.example" } }
                        ] }
                    }]
                }),
            ],
            ..Default::default()
        });
        let response = app(config(Some("test-key")), generator.clone())
            .oneshot(post(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let body = body_string(response).await;
        let lines: Vec<StreamChunk> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(body.ends_with('\n'));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], StreamChunk::text("Hel"));
        assert_eq!(lines[1].text, "lo");
        let sources = lines[1].sources.as_ref().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].uri, "https://a.example");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0].0, "test-key");
    }

    #[tokio::test]
    async fn test_request_translation() {
        let generator = Arc::new(ScriptedGenerator {
            responses: vec![text_response("ok")],
            ..Default::default()
        });
        let request = RelayRequest {
            prompt: "describe".into(),
            file: Some(FileData {
                name: "a.txt".into(),
                mime_type: "text/plain".into(),
                data: "aGk=".into(),
            }),
            history: vec![Message::model("Welcome"), Message::user("hi", None)],
            use_google_search: true,
        };
        let response = app(config(Some("k")), generator.clone())
            .oneshot(post(serde_json::to_value(&request).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_string(response).await;

        let seen = generator.seen.lock().unwrap();
        let upstream = &seen[0].1;
        assert_eq!(upstream.contents.len(), 3);
        assert_eq!(upstream.contents[2].parts.len(), 2);
        assert!(upstream.contents[2].parts[0].inline_data.is_some());
        assert!(upstream.tools.is_some());
    }

    #[tokio::test]
    async fn test_history_with_loose_parts_is_accepted() {
        let generator = Arc::new(ScriptedGenerator {
            responses: vec![text_response("ok")],
            ..Default::default()
        });
        let body = serde_json::json!({
            "prompt": "next",
            "history": [{
                "role": "user",
                "timestamp": 1,
                "parts": [
                    {},
                    { "text": "caption", "fileData": { "name": "a.txt", "mimeType": "text/plain", "data": "aGk=" } }
                ]
            }]
        });
        let response = app(config(Some("k")), generator.clone())
            .oneshot(post(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_string(response).await;

        let seen = generator.seen.lock().unwrap();
        let history = &seen[0].1.contents[0];
        assert_eq!(history.parts.len(), 2);
        assert_eq!(history.parts[0].text.as_deref(), Some(""));
        assert!(history.parts[1].inline_data.is_some());
    }

    #[tokio::test]
    async fn test_malformed_body_is_internal_error() {
        let generator = Arc::new(ScriptedGenerator::default());
        let request = Request::builder()
            .method("POST")
            .uri("/api/gemini")
            .body(Body::from("not json"))
            .unwrap();
        let response = app(config(Some("k")), generator.clone())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_internal_error() {
        let generator = Arc::new(ScriptedGenerator {
            reject: Some("API key not valid".into()),
            ..Default::default()
        });
        let response = app(config(Some("k")), generator)
            .oneshot(post(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], "API error (400): API key not valid");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_aborts_body() {
        let generator = Arc::new(ScriptedGenerator {
            responses: vec![text_response("partial")],
            fail_after: Some("boom".into()),
            ..Default::default()
        });
        let response = app(config(Some("k")), generator)
            .oneshot(post(serde_json::json!({ "prompt": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let result = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(result.is_err());
    }
}
