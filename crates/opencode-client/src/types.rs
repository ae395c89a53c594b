//! Request and response types for the OpenCode server API.
//!
//! Wire names follow the server: camelCase fields with `ID` suffixes
//! (`sessionID`, `providerID`). Open-ended payloads such as message parts and
//! the server configuration stay as [`serde_json::Value`]. Timestamps are
//! milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    #[serde(default)]
    pub version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Creation and update times.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default)]
    pub created: f64,
    #[serde(default)]
    pub updated: f64,
}

/// Public share link of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub url: String,
}

/// A conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "projectID", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub time: Timestamps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<ShareInfo>,
    /// Pending revert marker, present after [`crate::api::SessionsApi::revert`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert: Option<serde_json::Value>,
}

/// Request to create a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Create the session as a child of this one.
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CreateSessionRequest {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// Request to update a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Model selection by provider and model ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

/// Request to summarize a session with a given model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    #[serde(flatten)]
    pub model: ModelRef,
}

/// Request to revert a session to before a message (or part).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertRequest {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "partID", default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
}

/// Answer to a tool permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionReply {
    /// Allow this invocation only.
    Once,
    /// Allow this and future matching invocations.
    Always,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PermissionResponse {
    pub response: PermissionReply,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// One input part of a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PartInput {
    Text {
        text: String,
    },
    /// A file attachment given as a `file://` or `data:` URL.
    File {
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        url: String,
    },
    /// Hand the prompt to a named sub-agent.
    Agent {
        name: String,
    },
}

/// Request to send a prompt to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Client-chosen ID for the new user message.
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Per-tool enable flags.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, bool>,
    pub parts: Vec<PartInput>,
}

impl PromptRequest {
    /// A prompt consisting of a single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![PartInput::Text { text: text.into() }],
            ..Default::default()
        }
    }

    /// Add a file attachment.
    pub fn with_file(mut self, mime: impl Into<String>, url: impl Into<String>) -> Self {
        self.parts.push(PartInput::File {
            mime: mime.into(),
            filename: None,
            url: url.into(),
        });
        self
    }

    pub fn with_model(mut self, provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.model = Some(ModelRef::new(provider_id, model_id));
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Message times.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageTime {
    #[serde(default)]
    pub created: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<f64>,
}

/// Message metadata.
///
/// Role-specific fields (token usage, cost, model, errors) are kept in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// `user` or `assistant`.
    pub role: String,
    #[serde(default)]
    pub time: MessageTime,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A message together with its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithParts {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<serde_json::Value>,
}

impl MessageWithParts {
    /// Concatenated text of all `text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect()
    }
}

/// Request to run a slash command in a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// `provider/model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub command: String,
    #[serde(default)]
    pub arguments: String,
}

/// Request to run a shell command in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRequest {
    pub agent: String,
    pub command: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Files and search
// ─────────────────────────────────────────────────────────────────────────────

/// `{"text": ...}` wrapper used by text search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextField {
    pub text: String,
}

/// One text search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub path: TextField,
    pub lines: TextField,
    pub line_number: u64,
    pub absolute_offset: u64,
    #[serde(default)]
    pub submatches: Vec<serde_json::Value>,
}

/// A workspace symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    /// LSP symbol kind.
    pub kind: u32,
    #[serde(default)]
    pub location: serde_json::Value,
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub absolute: String,
    /// `file` or `directory`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ignored: bool,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.kind == "directory"
    }
}

/// File contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    /// `raw` or `patch`.
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// VCS status of one changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub removed: u64,
    /// `added`, `deleted` or `modified`.
    pub status: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// PTY
// ─────────────────────────────────────────────────────────────────────────────

/// A pseudo-terminal managed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pty {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Request to start a PTY.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePtyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

/// Request to update a PTY.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePtyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<PtySize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────────────────────────────────────

/// Connection state of one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpStatus {
    /// `connected`, `disabled` or `failed`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl McpStatus {
    pub fn is_connected(&self) -> bool {
        self.status == "connected"
    }
}

/// Request to register an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMcpRequest {
    pub name: String,
    /// Server definition (`{"type": "local", "command": [...]}` or
    /// `{"type": "remote", "url": ...}`).
    pub config: serde_json::Value,
}

impl AddMcpRequest {
    /// A locally spawned stdio server.
    pub fn local(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::json!({ "type": "local", "command": command }),
        }
    }

    /// A remote HTTP server.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: serde_json::json!({ "type": "remote", "url": url.into() }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config, providers, agents, projects
// ─────────────────────────────────────────────────────────────────────────────

/// An AI provider and its models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Models keyed by model ID.
    #[serde(default)]
    pub models: HashMap<String, serde_json::Value>,
}

/// Configured providers and the default model per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersResponse {
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub default: HashMap<String, String>,
}

/// An agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `primary`, `subagent` or `all`.
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub built_in: bool,
}

/// A project (one worktree) known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub worktree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<String>,
    #[serde(default)]
    pub time: Timestamps,
}
