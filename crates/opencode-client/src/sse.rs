//! Server-Sent Events parsing.
//!
//! [`SseParser`] is an incremental, push-based parser: feed it whatever byte
//! chunks the transport hands over and pop complete [`SseEvent`]s. Splitting
//! the same input across different chunk boundaries always yields the same
//! events.
//!
//! Accepted line forms:
//!
//! ```text
//! event: message
//! id: 42
//! data: {"delta":"Hel"}
//! data: continued
//! : comment
//!
//! ```
//!
//! A frame ends at an empty line. A trailing frame without its final empty
//! line is still emitted by [`SseParser::finish`]; strict SSE would drop it,
//! but some servers omit the last delimiter.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::{Stream, StreamExt};

/// One blank-line-delimited SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if present.
    pub event_type: Option<String>,
    /// All `data:` lines joined with `\n` (empty if the frame had none).
    pub data: String,
    /// Value of the `id:` field, if present.
    pub id: Option<String>,
}

/// Incremental SSE frame parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    /// Accumulated `data:` payload of the current frame.
    data: String,
    event_type: Option<String>,
    id: Option<String>,
    ready: VecDeque<SseEvent>,
    bytes_seen: u64,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes. Complete frames become available via [`Self::next_event`].
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes_seen += chunk.len() as u64;

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            self.take_line();
            rest = &rest[pos + 1..];
        }
        self.line.extend_from_slice(rest);
    }

    /// Pop the next complete frame, if any.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    /// Flush at end of input.
    ///
    /// Processes any unterminated last line and emits the pending frame if it
    /// has content. Returns every frame that had not been popped yet.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.line.is_empty() {
            self.take_line();
        }
        self.end_frame();
        self.ready.drain(..).collect()
    }

    /// Total number of bytes pushed so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    fn take_line(&mut self) {
        let mut raw = std::mem::take(&mut self.line);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        // Complete lines never split a UTF-8 sequence, so decoding here is safe
        // regardless of where the transport cut its chunks.
        let line = String::from_utf8_lossy(&raw);
        self.process_line(&line);
        // Hand the allocation back for the next line.
        raw.clear();
        self.line = raw;
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.end_frame();
            return;
        }
        if line.starts_with(':') || line.trim().is_empty() {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            other => tracing::trace!(field = other, "Ignoring unknown SSE field"),
        }
    }

    fn end_frame(&mut self) {
        if self.data.is_empty() && self.event_type.is_none() {
            // Nothing worth emitting; an `id:`-only frame is dropped as well.
            self.id = None;
            return;
        }
        let event = SseEvent {
            event_type: self.event_type.take(),
            // Copy out and keep the buffer's capacity for the next frame.
            data: self.data.clone(),
            id: self.id.take(),
        };
        self.data.clear();
        self.ready.push_back(event);
    }
}

/// Parse a byte stream into a stream of SSE frames.
///
/// Transport errors are passed through as `Err(message)` and end the stream.
pub fn sse_events<S, B, E>(body: S) -> impl Stream<Item = std::result::Result<SseEvent, String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut parser = SseParser::new();
        futures::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    parser.push(bytes.as_ref());
                    while let Some(event) = parser.next_event() {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e.to_string());
                    return;
                }
            }
        }

        for event in parser.finish() {
            yield Ok(event);
        }
    }
}
