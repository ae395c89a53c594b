//! Messages API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::stream::{MessageStream, StreamOptions, message_stream};
use crate::types::{CommandRequest, MessageInfo, MessageWithParts, PromptRequest, ShellRequest};

/// Messages API client.
pub struct MessagesApi {
    client: OpencodeClient,
}

impl MessagesApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// List messages of a session, oldest first.
    pub async fn list(&self, session_id: &str, limit: Option<u32>) -> Result<Vec<MessageWithParts>> {
        self.client
            .request(Request::get(format!("session/{session_id}/message")).query_opt("limit", limit))
            .await
    }

    /// Get one message.
    pub async fn get(&self, session_id: &str, message_id: &str) -> Result<MessageWithParts> {
        self.client
            .request(Request::get(format!(
                "session/{session_id}/message/{message_id}"
            )))
            .await
    }

    /// Send a prompt and wait for the complete assistant reply.
    pub async fn send(&self, session_id: &str, request: PromptRequest) -> Result<MessageWithParts> {
        self.client
            .request(
                Request::post(format!("session/{session_id}/message"))
                    .json(&request)?
                    .generation(),
            )
            .await
    }

    /// Send a prompt without waiting; progress arrives on the event bus.
    pub async fn send_async(&self, session_id: &str, request: PromptRequest) -> Result<()> {
        self.client
            .request_ack(Request::post(format!("session/{session_id}/prompt_async")).json(&request)?)
            .await
    }

    /// Run a slash command.
    pub async fn command(&self, session_id: &str, request: CommandRequest) -> Result<MessageWithParts> {
        self.client
            .request(
                Request::post(format!("session/{session_id}/command"))
                    .json(&request)?
                    .generation(),
            )
            .await
    }

    /// Run a shell command in the session's context.
    pub async fn shell(&self, session_id: &str, request: ShellRequest) -> Result<MessageInfo> {
        self.client
            .request(
                Request::post(format!("session/{session_id}/shell"))
                    .json(&request)?
                    .generation(),
            )
            .await
    }

    /// Send a prompt and stream the reply as it is generated.
    ///
    /// The returned stream is lazy: the request is sent on first poll. It
    /// yields each update in wire order and ends right after the update with
    /// `done` set. Connection establishment is retried per the client's
    /// pipeline; a stream that breaks after data started flowing is not.
    pub fn stream(
        &self,
        session_id: &str,
        request: PromptRequest,
        options: StreamOptions,
    ) -> Result<MessageStream> {
        let request = Request::post(format!("session/{session_id}/message")).json(&request)?;
        Ok(message_stream(self.client.clone(), request, options))
    }
}
