//! Conversions between the relay wire format and Gemini content.

use crate::models::{Message, Part, RelayRequest, StreamChunk};
use crate::upstream::models::{Content, ContentPart, GenerateContentRequest, GenerateContentResponse, Tool};

/// Translate the conversation history into upstream contents.
pub fn history_to_contents(history: &[Message]) -> Vec<Content> {
    history
        .iter()
        .map(|msg| {
            let parts = msg
                .parts
                .iter()
                .map(|part| match part {
                    Part::FileData(file) => ContentPart::inline_data(&file.mime_type, &file.data),
                    Part::Text(text) => ContentPart::text(text),
                })
                .collect();
            Content::new(msg.role.as_str(), parts)
        })
        .collect()
}

/// Build the full generation request: the history, then a new user turn
/// with the attachment (if any) followed by the prompt text.
pub fn build_request(request: &RelayRequest) -> GenerateContentRequest {
    let mut contents = history_to_contents(&request.history);

    let mut parts = Vec::with_capacity(2);
    if let Some(file) = &request.file {
        parts.push(ContentPart::inline_data(&file.mime_type, &file.data));
    }
    parts.push(ContentPart::text(&request.prompt));
    contents.push(Content::user(parts));

    GenerateContentRequest {
        contents,
        tools: request.use_google_search.then(|| vec![Tool::google_search()]),
    }
}

/// Re-encode one upstream chunk as the relay's wire unit.
pub fn to_stream_chunk(response: &GenerateContentResponse) -> StreamChunk {
    let sources = response.grounding_sources();
    StreamChunk {
        text: response.text(),
        sources: (!sources.is_empty()).then_some(sources),
    }
}
