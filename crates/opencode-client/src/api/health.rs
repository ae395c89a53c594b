//! Health API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::HealthResponse;

/// Health API client.
pub struct HealthApi {
    client: OpencodeClient,
}

impl HealthApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// Check server health.
    pub async fn check(&self) -> Result<HealthResponse> {
        self.client.request(Request::get("global/health")).await
    }

    /// Simple connectivity check - returns true if the server reports healthy.
    pub async fn is_healthy(&self) -> bool {
        match self.check().await {
            Ok(health) => health.healthy,
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}
