//! Client SDK for the OpenCode headless coding-agent server.
//!
//! This crate provides a typed, resilient client for the server's HTTP and
//! Server-Sent Events API.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use opencode_client::{CreateSessionRequest, OpencodeClient, PromptRequest, Result, StreamOptions};
//!
//! # async fn example() -> Result<()> {
//! // Create a client (defaults to http://127.0.0.1:4096)
//! let client = OpencodeClient::localhost()?;
//!
//! // Check server health
//! if client.health().is_healthy().await {
//!     println!("Server is healthy!");
//! }
//!
//! // Create a session
//! let session = client
//!     .sessions()
//!     .create(CreateSessionRequest::titled("demo"))
//!     .await?;
//!
//! // Stream a response
//! let mut stream = client.messages().stream(
//!     &session.id,
//!     PromptRequest::text("Tell me a story"),
//!     StreamOptions::new(),
//! )?;
//! while let Some(update) = stream.next().await {
//!     let update = update?;
//!     if let Some(delta) = &update.delta {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Resilience
//!
//! Every request runs through a [`Pipeline`] of circuit breaker, retry with
//! jittered exponential backoff, and per-attempt timeout, assembled from
//! [`ClientConfig`]. Failures carry an [`ErrorKind`]; both the retry policy
//! and the breaker classify them through [`Error::is_transient`].
//!
//! # API Coverage
//!
//! - **Health**: server health check
//! - **Sessions**: create, list, update, delete, share, revert, abort, permissions
//! - **Messages**: send, stream, async prompts, commands, shell
//! - **Files**: text/file/symbol search, listing, reading, VCS status
//! - **PTY**: manage pseudo-terminals
//! - **MCP**: manage Model Context Protocol servers
//! - **Config / Agents / Projects**: server metadata
//! - **Events**: the server-wide event bus

pub mod api;
pub mod client;
pub mod decode;
pub mod error;
pub mod resilience;
pub mod sse;
pub mod stream;
pub mod types;

pub use client::{CallKind, ClientBuilder, OpencodeClient, Request};
pub use decode::{DecodeError, MessageUpdate, ServerEvent};
pub use error::{Error, ErrorKind, Result};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit, Pipeline, RetryPolicy,
};
pub use sse::{SseEvent, SseParser};
pub use stream::{
    EventStream, MessageStream, ProgressSink, StreamOptions, StreamingProgress, StreamingStatus,
};
pub use types::*;

pub use opencode_config::ClientConfig;
pub use tokio_util::sync::CancellationToken;
