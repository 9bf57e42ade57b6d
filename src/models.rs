//! Wire and conversation types shared by the relay and the client.
//!
//! Field names follow the JSON the relay speaks (`mimeType`,
//! `useGoogleSearch`, `isError`), so the same structs serve the HTTP body,
//! the NDJSON stream and the in-memory message log.

use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Role tag used by the upstream content format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attached file, carried inline as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub name: String,
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// One segment of a message.
///
/// Serializes as `{"text": "..."}` or `{"fileData": {...}}`. Decoding is
/// lenient: a part carrying both keys is a file, and a part with neither
/// (or a null text) is an empty text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawPart")]
pub enum Part {
    Text(String),
    FileData(FileData),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    file_data: Option<FileData>,
}

impl From<RawPart> for Part {
    fn from(raw: RawPart) -> Self {
        match raw.file_data {
            Some(file) => Self::FileData(file),
            None => Self::Text(raw.text.unwrap_or_default()),
        }
    }
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::FileData(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileData> {
        match self {
            Self::Text(_) => None,
            Self::FileData(file) => Some(file),
        }
    }
}

/// A web citation returned by a search-grounded generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

impl GroundingSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

/// A single entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<GroundingSource>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            timestamp: chrono::Utc::now().timestamp_millis(),
            sources: None,
            is_error: false,
        }
    }

    /// A user turn: the prompt text, then the attachment if there is one.
    pub fn user(prompt: impl Into<String>, file: Option<FileData>) -> Self {
        let mut parts = vec![Part::Text(prompt.into())];
        if let Some(file) = file {
            parts.push(Part::FileData(file));
        }
        Self::new(Role::User, parts)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::Text(text.into())])
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn file(&self) -> Option<&FileData> {
        self.parts.iter().find_map(Part::as_file)
    }

    /// A model message with a single empty text part, i.e. a response that
    /// has been requested but has produced nothing yet.
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Model
            && !self.is_error
            && matches!(self.parts.as_slice(), [Part::Text(text)] if text.is_empty())
    }
}

/// One increment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sources: Option<Vec<GroundingSource>>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: None,
        }
    }
}

/// Body of `POST /api/gemini`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub prompt: String,
    #[serde(default)]
    pub file: Option<FileData>,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub use_google_search: bool,
}

/// Body of every non-streaming relay error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> FileData {
        FileData {
            name: "cat.png".into(),
            mime_type: "image/png".into(),
            data: "aGVsbG8=".into(),
        }
    }

    #[test]
    fn test_part_wire_shape() {
        let json = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "hi" }));

        let json = serde_json::to_value(Part::FileData(sample_file())).unwrap();
        assert_eq!(json["fileData"]["mimeType"], "image/png");
        assert_eq!(json["fileData"]["name"], "cat.png");
    }

    #[test]
    fn test_part_decoding_is_lenient() {
        let parts: Vec<Part> = serde_json::from_value(serde_json::json!([
            {},
            { "text": null },
            { "text": "caption", "fileData": { "name": "cat.png", "mimeType": "image/png", "data": "aGVsbG8=" } },
            { "text": "plain" }
        ]))
        .unwrap();

        assert_eq!(
            parts,
            vec![
                Part::text(""),
                Part::text(""),
                Part::FileData(sample_file()),
                Part::text("plain"),
            ]
        );
    }

    #[test]
    fn test_message_wire_shape() {
        let mut msg = Message::model("done");
        msg.timestamp = 1_700_000_000_000;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert!(json.get("sources").is_none());
        assert!(json.get("isError").is_none());

        msg.is_error = true;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["isError"], true);
    }

    #[test]
    fn test_message_from_browser_json() {
        let raw = r#"{
            "role": "user",
            "parts": [{"text": "look"}, {"fileData": {"name": "a.txt", "mimeType": "text/plain", "data": "eA=="}}],
            "timestamp": 12
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "look");
        assert_eq!(msg.file().unwrap().mime_type, "text/plain");
        assert!(!msg.is_error);
        assert!(msg.sources.is_none());
    }

    #[test]
    fn test_user_message_puts_text_before_file() {
        let msg = Message::user("describe this", Some(sample_file()));
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.parts[0].as_text(), Some("describe this"));
        assert!(msg.parts[1].as_file().is_some());
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(Message::model("").is_placeholder());
        assert!(!Message::model("x").is_placeholder());
        assert!(!Message::user("", None).is_placeholder());
    }

    #[test]
    fn test_stream_chunk_defaults() {
        let chunk: StreamChunk = serde_json::from_str(r#"{"text":"Hi"}"#).unwrap();
        assert_eq!(chunk, StreamChunk::text("Hi"));

        let chunk: StreamChunk = serde_json::from_str(r#"{"sources":null}"#).unwrap();
        assert_eq!(chunk.text, "");

        let chunk = StreamChunk::text("x");
        let json = serde_json::to_string(&chunk).unwrap();
        assert_eq!(json, r#"{"text":"x","sources":null}"#);
    }

    #[test]
    fn test_relay_request_defaults() {
        let req: RelayRequest = serde_json::from_str(r#"{"prompt":"Hello"}"#).unwrap();
        assert_eq!(req.prompt, "Hello");
        assert!(req.file.is_none());
        assert!(req.history.is_empty());
        assert!(!req.use_google_search);

        let json = serde_json::to_value(&RelayRequest {
            prompt: "p".into(),
            file: None,
            history: vec![],
            use_google_search: true,
        })
        .unwrap();
        assert_eq!(json["useGoogleSearch"], true);
        assert!(json["file"].is_null());
    }
}
