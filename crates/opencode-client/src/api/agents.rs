//! Agents API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::Agent;

/// Agents API client.
pub struct AgentsApi {
    client: OpencodeClient,
}

impl AgentsApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// List all available agents.
    pub async fn list(&self) -> Result<Vec<Agent>> {
        self.client.request(Request::get("agent")).await
    }
}
