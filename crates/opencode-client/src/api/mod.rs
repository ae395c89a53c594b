//! API endpoint groups.
//!
//! Each group is a thin typed wrapper over [`crate::OpencodeClient::request`];
//! every call goes through the client's resilience pipeline.

mod agents;
mod config;
mod events;
mod files;
mod health;
mod mcp;
mod messages;
mod projects;
mod pty;
mod sessions;

pub use agents::AgentsApi;
pub use config::ConfigApi;
pub use events::EventsApi;
pub use files::FilesApi;
pub use health::HealthApi;
pub use mcp::McpApi;
pub use messages::MessagesApi;
pub use projects::ProjectsApi;
pub use pty::PtyApi;
pub use sessions::SessionsApi;
