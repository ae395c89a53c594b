//! Sessions API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::{
    CreateSessionRequest, PermissionReply, PermissionResponse, RevertRequest, Session,
    SummarizeRequest, UpdateSessionRequest,
};

/// Sessions API client.
pub struct SessionsApi {
    client: OpencodeClient,
}

impl SessionsApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// List all sessions.
    pub async fn list(&self) -> Result<Vec<Session>> {
        self.client.request(Request::get("session")).await
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.client.request(Request::get(format!("session/{id}"))).await
    }

    /// Create a new session.
    pub async fn create(&self, request: CreateSessionRequest) -> Result<Session> {
        self.client
            .request(Request::post("session").json(&request)?)
            .await
    }

    /// Update a session.
    pub async fn update(&self, id: &str, request: UpdateSessionRequest) -> Result<Session> {
        self.client
            .request(Request::patch(format!("session/{id}")).json(&request)?)
            .await
    }

    /// Delete a session and its children.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client
            .request_ack(Request::delete(format!("session/{id}")))
            .await
    }

    /// Sessions forked from this one.
    pub async fn children(&self, id: &str) -> Result<Vec<Session>> {
        self.client
            .request(Request::get(format!("session/{id}/children")))
            .await
    }

    /// Abort the generation running in a session.
    pub async fn abort(&self, id: &str) -> Result<()> {
        self.client
            .request_ack(Request::post(format!("session/{id}/abort")))
            .await
    }

    /// Publish a session and return it with its share link.
    pub async fn share(&self, id: &str) -> Result<Session> {
        self.client
            .request(Request::post(format!("session/{id}/share")))
            .await
    }

    /// Remove a session's share link.
    pub async fn unshare(&self, id: &str) -> Result<Session> {
        self.client
            .request(Request::delete(format!("session/{id}/share")))
            .await
    }

    /// Compact the session history. Runs AI generation.
    pub async fn summarize(&self, id: &str, request: SummarizeRequest) -> Result<()> {
        self.client
            .request_ack(
                Request::post(format!("session/{id}/summarize"))
                    .json(&request)?
                    .generation(),
            )
            .await
    }

    /// Revert the session to before a message.
    pub async fn revert(&self, id: &str, request: RevertRequest) -> Result<Session> {
        self.client
            .request(Request::post(format!("session/{id}/revert")).json(&request)?)
            .await
    }

    /// Restore all reverted messages.
    pub async fn unrevert(&self, id: &str) -> Result<Session> {
        self.client
            .request(Request::post(format!("session/{id}/unrevert")))
            .await
    }

    /// Answer a pending tool permission request.
    pub async fn respond_permission(
        &self,
        id: &str,
        permission_id: &str,
        reply: PermissionReply,
    ) -> Result<()> {
        let body = PermissionResponse { response: reply };
        self.client
            .request_ack(
                Request::post(format!("session/{id}/permissions/{permission_id}")).json(&body)?,
            )
            .await
    }
}
