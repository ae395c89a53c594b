//! MCP (Model Context Protocol) API.

use std::collections::HashMap;

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::{AddMcpRequest, McpStatus};

/// MCP API client.
pub struct McpApi {
    client: OpencodeClient,
}

impl McpApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// Status of every configured MCP server, keyed by name.
    pub async fn status(&self) -> Result<HashMap<String, McpStatus>> {
        self.client.request(Request::get("mcp")).await
    }

    /// Register an MCP server. Returns the updated status map.
    pub async fn add(&self, request: AddMcpRequest) -> Result<HashMap<String, McpStatus>> {
        self.client.request(Request::post("mcp").json(&request)?).await
    }

    /// Connect to a server.
    pub async fn connect(&self, name: &str) -> Result<()> {
        self.client
            .request_ack(Request::post(format!("mcp/{name}/connect")))
            .await
    }

    /// Disconnect from a server.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        self.client
            .request_ack(Request::post(format!("mcp/{name}/disconnect")))
            .await
    }
}
