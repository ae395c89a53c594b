//! PTY API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::{CreatePtyRequest, Pty, UpdatePtyRequest};

/// PTY API client.
pub struct PtyApi {
    client: OpencodeClient,
}

impl PtyApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// List running PTYs.
    pub async fn list(&self) -> Result<Vec<Pty>> {
        self.client.request(Request::get("pty")).await
    }

    /// Start a PTY.
    pub async fn create(&self, request: CreatePtyRequest) -> Result<Pty> {
        self.client.request(Request::post("pty").json(&request)?).await
    }

    /// Get a PTY by ID.
    pub async fn get(&self, id: &str) -> Result<Pty> {
        self.client.request(Request::get(format!("pty/{id}"))).await
    }

    /// Rename or resize a PTY.
    pub async fn update(&self, id: &str, request: UpdatePtyRequest) -> Result<Pty> {
        self.client
            .request(Request::put(format!("pty/{id}")).json(&request)?)
            .await
    }

    /// Kill and remove a PTY.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.client
            .request_ack(Request::delete(format!("pty/{id}")))
            .await
    }
}
