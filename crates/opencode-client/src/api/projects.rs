//! Projects API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::Project;

/// Projects API client.
pub struct ProjectsApi {
    client: OpencodeClient,
}

impl ProjectsApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// List all projects the server knows about.
    pub async fn list(&self) -> Result<Vec<Project>> {
        self.client.request(Request::get("project")).await
    }

    /// The project the server is running in.
    pub async fn current(&self) -> Result<Project> {
        self.client.request(Request::get("project/current")).await
    }
}
