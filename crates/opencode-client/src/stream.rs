//! Streaming consumer: lazy sequences of decoded updates.
//!
//! A [`MessageStream`] ties the transport, [`SseParser`], and
//! [`decode_update`] together. Nothing is sent until the stream is first
//! polled, each stream owns its own connection, and dropping it releases that
//! connection.

use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{OpencodeClient, Request};
use crate::decode::{DecodeError, MessageUpdate, ServerEvent, decode_server_event, decode_update};
use crate::error::{Error, Result};
use crate::sse::{SseEvent, SseParser, sse_events};

/// Lazy sequence of message updates, ending after the `done` update.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<MessageUpdate>> + Send>>;

/// Lazy sequence of server bus events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent>> + Send>>;

/// Lifecycle of one streaming call.
///
/// `Starting -> Connected -> Receiving* -> Completed | Error | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingStatus {
    Starting,
    Connected,
    Receiving,
    Completed,
    Error,
    Cancelled,
}

impl StreamingStatus {
    /// Whether no further progress follows this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of a streaming call's cumulative state.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingProgress {
    pub status: StreamingStatus,
    /// Updates yielded so far.
    pub chunk_count: u64,
    /// Raw body bytes read so far.
    pub bytes_received: u64,
    /// Characters of delta text yielded so far.
    pub char_count: u64,
    pub elapsed: Duration,
    /// Delta text of the most recent update.
    pub latest_chunk: Option<String>,
    pub error: Option<String>,
}

/// Observer of [`StreamingProgress`] snapshots.
///
/// Called inline from the stream; implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: StreamingProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(StreamingProgress) + Send + Sync,
{
    fn report(&self, progress: StreamingProgress) {
        self(progress)
    }
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<StreamingProgress> {
    fn report(&self, progress: StreamingProgress) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(progress);
    }
}

/// Per-call options for a streaming operation.
#[derive(Clone, Default)]
pub struct StreamOptions {
    /// Cancels the stream; defaults to the client handle's token.
    pub cancel: Option<CancellationToken>,
    /// Receives a snapshot on every state change.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Running totals behind the progress snapshots.
pub(crate) struct ProgressTracker {
    sink: Option<Arc<dyn ProgressSink>>,
    started: Instant,
    chunk_count: u64,
    bytes_received: u64,
    char_count: u64,
    latest_chunk: Option<String>,
}

impl ProgressTracker {
    pub(crate) fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            started: Instant::now(),
            chunk_count: 0,
            bytes_received: 0,
            char_count: 0,
            latest_chunk: None,
        }
    }

    fn emit(&self, status: StreamingStatus, error: Option<String>) {
        let Some(sink) = &self.sink else {
            return;
        };
        sink.report(StreamingProgress {
            status,
            chunk_count: self.chunk_count,
            bytes_received: self.bytes_received,
            char_count: self.char_count,
            elapsed: self.started.elapsed(),
            latest_chunk: self.latest_chunk.clone(),
            error,
        });
    }

    fn bytes(&mut self, n: usize) {
        self.bytes_received += n as u64;
    }

    fn received(&mut self, update: &MessageUpdate) {
        self.chunk_count += 1;
        if let Some(delta) = &update.delta {
            self.char_count += delta.chars().count() as u64;
            self.latest_chunk = Some(delta.clone());
        }
        self.emit(StreamingStatus::Receiving, None);
    }

    fn finished(&self, outcome: std::result::Result<(), &Error>) {
        match outcome {
            Ok(()) => self.emit(StreamingStatus::Completed, None),
            Err(e) if e.is_cancelled() => self.emit(StreamingStatus::Cancelled, None),
            Err(e) => self.emit(StreamingStatus::Error, Some(e.to_string())),
        }
    }
}

/// Build the lazy message stream for `request`.
pub(crate) fn message_stream(
    client: OpencodeClient,
    request: Request,
    options: StreamOptions,
) -> MessageStream {
    let cancel = options
        .cancel
        .unwrap_or_else(|| client.cancellation_token().clone());
    let operation = request.operation();

    Box::pin(async_stream::stream! {
        let tracker = ProgressTracker::new(options.progress);
        tracker.emit(StreamingStatus::Starting, None);

        let client = client.with_cancellation(cancel.clone());
        let response = match client.open_stream(request).await {
            Ok(response) => response,
            Err(e) => {
                tracker.finished(Err(&e));
                yield Err(e);
                return;
            }
        };
        tracker.emit(StreamingStatus::Connected, None);

        let updates = decode_updates(operation, response.bytes_stream(), cancel, tracker);
        futures::pin_mut!(updates);
        while let Some(item) = updates.next().await {
            yield item;
        }
    })
}

/// Turn an SSE body into message updates.
///
/// Stops right after the `done` update without reading further. Cancellation
/// is checked before every read and between frames. Undecodable frames are
/// logged and skipped; a body that ends without `done` is an error.
pub(crate) fn decode_updates<S, B, E>(
    operation: String,
    body: S,
    cancel: CancellationToken,
    mut tracker: ProgressTracker,
) -> impl Stream<Item = Result<MessageUpdate>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut parser = SseParser::new();
        let mut frames: Vec<SseEvent> = Vec::new();
        let mut yielded = 0u64;
        let mut last_decode_error: Option<DecodeError> = None;
        futures::pin_mut!(body);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            let Some(chunk) = chunk else {
                let err = Error::cancelled(&operation);
                tracker.finished(Err(&err));
                yield Err(err);
                return;
            };

            let ended = match chunk {
                Some(Ok(bytes)) => {
                    let bytes = bytes.as_ref();
                    tracker.bytes(bytes.len());
                    parser.push(bytes);
                    while let Some(frame) = parser.next_event() {
                        frames.push(frame);
                    }
                    false
                }
                Some(Err(e)) => {
                    let err = Error::Stream {
                        operation: operation.clone(),
                        message: e.to_string(),
                    };
                    tracker.finished(Err(&err));
                    yield Err(err);
                    return;
                }
                None => {
                    frames.extend(parser.finish());
                    true
                }
            };

            for frame in frames.drain(..) {
                if cancel.is_cancelled() {
                    let err = Error::cancelled(&operation);
                    tracker.finished(Err(&err));
                    yield Err(err);
                    return;
                }
                match decode_update(&frame) {
                    Ok(Some(update)) => {
                        tracker.received(&update);
                        yielded += 1;
                        let done = update.done;
                        yield Ok(update);
                        if done {
                            tracker.finished(Ok(()));
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            operation = %operation,
                            event_type = ?e.event_type,
                            snippet = %e.snippet,
                            error = %e.message,
                            "Skipping undecodable stream frame"
                        );
                        last_decode_error = Some(e);
                    }
                }
            }

            if ended {
                let err = match last_decode_error.take() {
                    Some(e) if yielded == 0 => Error::Decode {
                        operation: operation.clone(),
                        message: e.to_string(),
                    },
                    _ => Error::Stream {
                        operation: operation.clone(),
                        message: "stream ended before completion".to_string(),
                    },
                };
                tracker.finished(Err(&err));
                yield Err(err);
                return;
            }
        }
    }
}

/// Build the lazy server event stream for `request`.
///
/// Malformed events are logged and skipped. The stream ends when the server
/// closes the connection.
pub(crate) fn event_stream(
    client: OpencodeClient,
    request: Request,
    cancel: CancellationToken,
) -> EventStream {
    let operation = request.operation();

    Box::pin(async_stream::stream! {
        let client = client.with_cancellation(cancel.clone());
        let response = match client.open_stream(request).await {
            Ok(response) => response,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let frames = sse_events(response.bytes_stream());
        futures::pin_mut!(frames);

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                frame = frames.next() => Some(frame),
            };
            let Some(frame) = frame else {
                yield Err(Error::cancelled(&operation));
                return;
            };
            match frame {
                Some(Ok(frame)) => match decode_server_event(&frame) {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        operation = %operation,
                        snippet = %e.snippet,
                        error = %e.message,
                        "Skipping undecodable server event"
                    ),
                },
                Some(Err(message)) => {
                    yield Err(Error::Stream { operation: operation.clone(), message });
                    return;
                }
                None => {
                    tracing::debug!(operation = %operation, "Event stream closed by server");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use std::task::Poll;

    type Chunk = std::result::Result<&'static [u8], std::io::Error>;

    const SCENARIO: &str = "event: message\n\
        data: {\"delta\":\"Hel\",\"messageId\":\"m1\"}\n\
        \n\
        data: {\"delta\":\"lo\",\"messageId\":\"m1\"}\n\
        \n\
        data: {\"done\":true,\"messageId\":\"m1\"}\n\
        \n";

    fn body(chunks: Vec<&'static str>) -> impl Stream<Item = Chunk> + Send + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes())))
    }

    /// A body that panics if read again.
    fn poisoned() -> impl Stream<Item = Chunk> + Send + 'static {
        futures::stream::poll_fn(|_| -> Poll<Option<Chunk>> { panic!("body read after done") })
    }

    fn recorder() -> (Arc<Mutex<Vec<StreamingProgress>>>, ProgressTracker) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |p: StreamingProgress| seen.lock().push(p)
        };
        let sink: Arc<dyn ProgressSink> = Arc::new(sink);
        (seen, ProgressTracker::new(Some(sink)))
    }

    async fn collect<S: Stream<Item = Result<MessageUpdate>>>(stream: S) -> Vec<Result<MessageUpdate>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_scenario_yields_three_updates_then_stops() {
        let (seen, tracker) = recorder();
        let updates = collect(decode_updates(
            "POST /session/s/message".to_string(),
            body(vec![SCENARIO]).chain(poisoned()),
            CancellationToken::new(),
            tracker,
        ))
        .await;

        let updates: Vec<MessageUpdate> = updates.into_iter().map(|u| u.unwrap()).collect();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].delta.as_deref(), Some("Hel"));
        assert_eq!(updates[0].event_type.as_deref(), Some("message"));
        assert_eq!(updates[1].delta.as_deref(), Some("lo"));
        assert!(updates[2].done);
        assert!(updates.iter().all(|u| u.message_id == "m1"));

        let seen = seen.lock();
        let statuses: Vec<_> = seen.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                StreamingStatus::Receiving,
                StreamingStatus::Receiving,
                StreamingStatus::Receiving,
                StreamingStatus::Completed,
            ]
        );
        let last = seen.last().unwrap();
        assert_eq!(last.chunk_count, 3);
        assert_eq!(last.char_count, 5);
        assert_eq!(last.bytes_received, SCENARIO.len() as u64);
        assert_eq!(last.latest_chunk.as_deref(), Some("lo"));
    }

    #[tokio::test]
    async fn test_scenario_chunked_arbitrarily() {
        let cuts = [3, 17, 40, 41, 90, 120];
        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunks.push(&SCENARIO[start..cut]);
            start = cut;
        }
        chunks.push(&SCENARIO[start..]);

        let updates = collect(decode_updates(
            "op".to_string(),
            body(chunks),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|u| u.is_ok()));
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped() {
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec![
                "data: {\"delta\":\"a\",\"messageId\":\"m\"}\n\n",
                "data: {this is not json\n\n",
                "data: {\"delta\":\"b\",\"messageId\":\"m\"}\n\n",
                "data: {\"done\":true,\"messageId\":\"m\"}\n\n",
            ]),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;

        let deltas: Vec<_> = updates
            .into_iter()
            .map(|u| u.unwrap())
            .filter_map(|u| u.delta)
            .collect();
        assert_eq!(deltas, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_heartbeats_absorbed() {
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec![
                ": ping\n\n",
                "event: heartbeat\n\n",
                "data: {\"messageId\":\"m\"}\n\n",
                "data: {\"done\":true,\"messageId\":\"m\"}\n\n",
            ]),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;
        assert_eq!(updates.len(), 1);
        assert!(updates[0].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_unterminated_done_frame_flushed() {
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec!["data: {\"delta\":\"x\",\"messageId\":\"m\"}\n\ndata: {\"done\":true}"]),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;
        assert_eq!(updates.len(), 2);
        assert!(updates[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (seen, tracker) = recorder();
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec!["data: {\"delta\":\"x\",\"messageId\":\"m\"}\n\n"]),
            CancellationToken::new(),
            tracker,
        ))
        .await;

        assert_eq!(updates.len(), 2);
        let err = updates[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert_eq!(seen.lock().last().unwrap().status, StreamingStatus::Error);
    }

    #[tokio::test]
    async fn test_only_garbage_is_decode_error() {
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec!["data: nope\n\ndata: still nope\n\n"]),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].as_ref().unwrap_err().kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let chunks: Vec<Chunk> = vec![
            Ok(&b"data: {\"delta\":\"x\",\"messageId\":\"m\"}\n\n"[..]),
            Err(std::io::Error::other("connection reset")),
        ];
        let updates = collect(decode_updates(
            "op".to_string(),
            futures::stream::iter(chunks),
            CancellationToken::new(),
            ProgressTracker::new(None),
        ))
        .await;
        assert_eq!(updates.len(), 2);
        let err = updates[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let (seen, tracker) = recorder();
        let cancel = CancellationToken::new();
        let stream = decode_updates(
            "op".to_string(),
            body(vec!["data: {\"delta\":\"x\",\"messageId\":\"m\"}\n\n"])
                .chain(futures::stream::pending()),
            cancel.clone(),
            tracker,
        );
        futures::pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.delta.as_deref(), Some("x"));

        cancel.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(stream.next().await.is_none());
        assert_eq!(seen.lock().last().unwrap().status, StreamingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_between_frames() {
        let cancel = CancellationToken::new();
        let stream = decode_updates(
            "op".to_string(),
            body(vec![
                "data: {\"delta\":\"a\",\"messageId\":\"m\"}\n\ndata: {\"delta\":\"b\",\"messageId\":\"m\"}\n\n",
            ]),
            cancel.clone(),
            ProgressTracker::new(None),
        );
        futures::pin_mut!(stream);

        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        // "b" was already read off the wire but is not delivered.
        assert!(stream.next().await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: Arc<dyn ProgressSink> = Arc::new(tx);
        let updates = collect(decode_updates(
            "op".to_string(),
            body(vec![SCENARIO]),
            CancellationToken::new(),
            ProgressTracker::new(Some(sink)),
        ))
        .await;
        assert_eq!(updates.len(), 3);

        let mut statuses = Vec::new();
        while let Ok(p) = rx.try_recv() {
            statuses.push(p.status);
        }
        assert_eq!(statuses.last(), Some(&StreamingStatus::Completed));
        assert!(statuses.last().unwrap().is_terminal());
    }
}
