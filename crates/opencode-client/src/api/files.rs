//! File and search API.

use crate::client::{OpencodeClient, Request};
use crate::error::Result;
use crate::types::{FileContent, FileNode, FileStatus, Symbol, TextMatch};

/// File and search API client.
pub struct FilesApi {
    client: OpencodeClient,
}

impl FilesApi {
    pub(crate) fn new(client: OpencodeClient) -> Self {
        Self { client }
    }

    /// Search file contents for a pattern.
    pub async fn find_text(&self, pattern: &str) -> Result<Vec<TextMatch>> {
        self.client
            .request(Request::get("find").query("pattern", pattern))
            .await
    }

    /// Find files whose names match `query`.
    pub async fn find_files(&self, query: &str) -> Result<Vec<String>> {
        self.client
            .request(Request::get("find/file").query("query", query))
            .await
    }

    /// Find workspace symbols matching `query`.
    pub async fn find_symbols(&self, query: &str) -> Result<Vec<Symbol>> {
        self.client
            .request(Request::get("find/symbol").query("query", query))
            .await
    }

    /// List a directory.
    pub async fn list(&self, path: &str) -> Result<Vec<FileNode>> {
        self.client
            .request(Request::get("file").query("path", path))
            .await
    }

    /// Read a file.
    pub async fn read(&self, path: &str) -> Result<FileContent> {
        self.client
            .request(Request::get("file/content").query("path", path))
            .await
    }

    /// VCS status of changed files.
    pub async fn status(&self) -> Result<Vec<FileStatus>> {
        self.client.request(Request::get("file/status")).await
    }
}
