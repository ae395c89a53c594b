//! Server configuration API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::ProvidersResponse;

/// Server configuration API client.
pub struct ConfigApi {
    client: OpencodeClient,
}

impl ConfigApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// Get the effective server configuration.
    pub async fn get(&self) -> Result<serde_json::Value> {
        self.client.request(Request::get("config")).await
    }

    /// List configured providers and their default models.
    pub async fn providers(&self) -> Result<ProvidersResponse> {
        self.client.request(Request::get("config/providers")).await
    }
}
