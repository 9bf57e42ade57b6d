//! Newline-delimited JSON stream decoder.
//!
//! Turns a stream of byte chunks into a stream of parsed values, one per
//! line. Lines may be split across reads at any byte (including inside a
//! multi-byte UTF-8 sequence); the trailing partial line stays buffered
//! until the next read or the end of the stream.
//!
//! Parsing is tolerant: a line that is not valid JSON for the target type is
//! logged and skipped instead of failing the whole stream. Transport errors
//! from the underlying byte stream are passed through and end the stream.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;

use crate::models::StreamChunk;

pin_project! {
    /// NDJSON stream parser.
    ///
    /// Consumes a stream of `Bytes` and yields one `T` per complete line.
    pub struct NdjsonStream<S, T> {
        #[pin]
        byte_stream: S,
        buffer: BytesMut,
        pending: VecDeque<T>,
        finished: bool,
        _marker: PhantomData<fn() -> T>,
    }
}

/// Decoder specialised to the relay's wire unit.
pub type ChunkStream<S> = NdjsonStream<S, StreamChunk>;

impl<S, T> NdjsonStream<S, T> {
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            finished: false,
            _marker: PhantomData,
        }
    }
}

impl<S, T, E> Stream for NdjsonStream<S, T>
where
    S: Stream<Item = Result<Bytes, E>>,
    T: DeserializeOwned,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(value) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.byte_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    drain_lines(this.buffer, this.pending);
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    // The last object may arrive without a trailing newline.
                    let rest = this.buffer.split();
                    if let Some(value) = parse_line(&rest) {
                        this.pending.push_back(value);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Move every complete line out of `buffer` into `pending`.
fn drain_lines<T: DeserializeOwned>(buffer: &mut BytesMut, pending: &mut VecDeque<T>) {
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(pos + 1);
        if let Some(value) = parse_line(&line[..pos]) {
            pending.push_back(value);
        }
    }
}

/// Parse one line, returning `None` for blank or malformed input.
fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Option<T> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            tracing::warn!(error = %e, len = line.len(), "Dropping stream line with invalid UTF-8");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(line = %text, error = %e, "Error parsing stream line");
            None
        }
    }
}
