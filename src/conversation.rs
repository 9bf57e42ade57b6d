//! Conversation state for the chat front-end.
//!
//! A [`Conversation`] owns the message log and drives one response stream at
//! a time. Views never touch the log directly; they observe immutable
//! [`Snapshot`]s through a `watch` channel, and every mutation publishes a
//! fresh one.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use crate::client::{ChatTransport, ClientError};
use crate::models::{FileData, GroundingSource, Message, Part, StreamChunk};
use crate::sources::merge_sources;

/// Immutable view of the conversation at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub messages: Arc<[Message]>,
    pub in_flight: bool,
    pub error: Option<String>,
}

/// A submission accepted by [`Conversation::begin`], ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub prompt: String,
    pub file: Option<FileData>,
    /// The log as it was before this turn's user message.
    pub history: Vec<Message>,
    pub use_google_search: bool,
}

/// Result of [`Conversation::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Rejected without any change: a response was in flight, or there was
    /// nothing to send.
    Ignored,
    Completed,
    /// The response failed with the given message.
    Failed(String),
}

pub struct Conversation {
    messages: Vec<Message>,
    in_flight: bool,
    /// The in-flight response has been replaced by an error.
    failed: bool,
    error: Option<String>,
    use_google_search: bool,
    response_text: String,
    response_sources: Vec<GroundingSource>,
    snapshots: watch::Sender<Snapshot>,
}

impl Conversation {
    /// Start a conversation whose log holds one model message, `welcome`.
    pub fn new(welcome: impl Into<String>) -> Self {
        let messages = vec![Message::model(welcome)];
        let (snapshots, _) = watch::channel(Snapshot {
            messages: Arc::from(messages.clone()),
            in_flight: false,
            error: None,
        });
        Self {
            messages,
            in_flight: false,
            failed: false,
            error: None,
            use_google_search: false,
            response_text: String::new(),
            response_sources: Vec::new(),
            snapshots,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn use_google_search(&self) -> bool {
        self.use_google_search
    }

    /// Takes effect from the next submission.
    pub fn set_use_google_search(&mut self, enabled: bool) {
        self.use_google_search = enabled;
    }

    /// Receiver for snapshots. The current one is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Send `prompt` (and `file`) and apply the response as it streams in.
    ///
    /// Failures are recorded on the conversation, not returned: the
    /// response message is replaced with the error text.
    pub async fn submit(
        &mut self,
        transport: &dyn ChatTransport,
        prompt: &str,
        file: Option<FileData>,
    ) -> SubmitOutcome {
        let Some(turn) = self.begin(prompt, file) else {
            return SubmitOutcome::Ignored;
        };

        let outcome = match self.stream_response(transport, turn).await {
            Ok(()) => SubmitOutcome::Completed,
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, "Response failed");
                self.fail(&message);
                SubmitOutcome::Failed(message)
            }
        };
        self.finish();
        outcome
    }

    async fn stream_response(
        &mut self,
        transport: &dyn ChatTransport,
        turn: PendingTurn,
    ) -> Result<(), ClientError> {
        let mut chunks = transport
            .open_stream(turn.prompt, turn.file, turn.history, turn.use_google_search)
            .await?;
        while let Some(chunk) = chunks.next().await {
            self.apply_chunk(chunk?);
        }
        Ok(())
    }

    /// Append the user message and a placeholder response, and mark the
    /// conversation in flight. Returns `None` and changes nothing when a
    /// response is already in flight or there is nothing to send.
    pub fn begin(&mut self, prompt: &str, file: Option<FileData>) -> Option<PendingTurn> {
        if self.in_flight || (prompt.trim().is_empty() && file.is_none()) {
            return None;
        }

        let turn = PendingTurn {
            prompt: prompt.to_string(),
            file: file.clone(),
            history: self.messages.clone(),
            use_google_search: self.use_google_search,
        };

        self.in_flight = true;
        self.failed = false;
        self.error = None;
        self.response_text.clear();
        self.response_sources.clear();
        self.messages.push(Message::user(prompt, file));
        self.messages.push(Message::model(""));
        self.publish();
        Some(turn)
    }

    /// Fold one chunk into the response message. Ignored unless a response
    /// is streaming and has not failed.
    pub fn apply_chunk(&mut self, chunk: StreamChunk) {
        if !self.in_flight || self.failed {
            return;
        }
        self.response_text.push_str(&chunk.text);
        if let Some(sources) = chunk.sources.filter(|s| !s.is_empty()) {
            let current = std::mem::take(&mut self.response_sources);
            self.response_sources = merge_sources(current, sources);
        }

        if let Some(last) = self.messages.last_mut() {
            last.parts = vec![Part::Text(self.response_text.clone())];
            last.sources =
                (!self.response_sources.is_empty()).then(|| self.response_sources.clone());
        }
        self.publish();
    }

    /// Replace the response message with an error. Only the first failure
    /// of an in-flight response is recorded.
    pub fn fail(&mut self, message: &str) {
        if !self.in_flight || self.failed {
            return;
        }
        self.failed = true;
        let text = format!("Error: {message}");
        if let Some(last) = self.messages.last_mut() {
            last.parts = vec![Part::Text(text.clone())];
            last.is_error = true;
        }
        self.error = Some(text);
        self.publish();
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(Snapshot {
            messages: Arc::from(self.messages.as_slice()),
            in_flight: self.in_flight,
            error: self.error.clone(),
        });
    }
}
