//! Generic Server-Sent Events (SSE) stream parser.
//!
//! Handles the framing of SSE streams, yielding individual events.
//! Does NOT interpret the data payload, it just provides the raw event.
//! Events are separated by a blank line (`\n\n` or `\r\n\r\n`).

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use pin_project_lite::pin_project;

pin_project! {
    /// Generic SSE stream parser.
    ///
    /// Consumes a stream of Bytes and yields raw SSE events.
    pub struct SseStream<S> {
        #[pin]
        byte_stream: S,
        buffer: BytesMut,
        pending_events: VecDeque<SseEvent>,
        finished: bool,
    }
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl<S> SseStream<S> {
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            buffer: BytesMut::new(),
            pending_events: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending_events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.byte_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);

                    while let Some((end, sep_len)) = find_block_end(this.buffer) {
                        let block = this.buffer.split_to(end + sep_len);
                        if let Some(event) = parse_sse_block(&String::from_utf8_lossy(&block[..end])) {
                            this.pending_events.push_back(event);
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    // Flush remaining buffer
                    let rest = this.buffer.split();
                    if let Some(event) = parse_sse_block(&String::from_utf8_lossy(&rest)) {
                        this.pending_events.push_back(event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Locate the first blank-line separator, returning the block length and the
/// separator length.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = String::new();
    let mut id = None;

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    if data.is_empty() && event.is_none() && id.is_none() {
        return None;
    }

    Some(SseEvent { event, data, id })
}
