//! Server event bus.

use tokio_util::sync::CancellationToken;

use crate::client::{OpencodeClient, Request};
use crate::stream::{EventStream, event_stream};

/// Event bus client.
pub struct EventsApi {
    client: OpencodeClient,
}

impl EventsApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// Subscribe to `GET /event`.
    ///
    /// The connection is opened on first poll and closed when the stream is
    /// dropped or the client handle's token is cancelled.
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_with(self.client.cancellation_token().clone())
    }

    /// Subscribe with an explicit cancellation token.
    pub fn subscribe_with(&self, cancel: CancellationToken) -> EventStream {
        event_stream(self.client.clone(), Request::get("event"), cancel)
    }
}
