//! Shared networking infrastructure.

pub mod client;
pub mod ndjson;
pub mod sse;

pub use client::{HttpClient, HttpClientBuilder};
pub use ndjson::{ChunkStream, NdjsonStream};
pub use sse::{SseEvent, SseStream};
