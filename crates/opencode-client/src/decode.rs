//! Decoding SSE payloads into typed updates.
//!
//! Decoding is per frame: a malformed payload produces a [`DecodeError`] for
//! that frame only and never ends the surrounding stream.

use serde::{Deserialize, Serialize};

use crate::sse::SseEvent;

/// One incremental update of a streamed assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    /// Text fragment appended to the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Message the update belongs to.
    #[serde(default, alias = "messageID")]
    pub message_id: String,
    /// Whether this is the final update of the message.
    #[serde(default)]
    pub done: bool,
    /// SSE `event:` name of the frame that carried the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl MessageUpdate {
    /// Whether the update carries anything a caller should see.
    pub fn is_meaningful(&self) -> bool {
        self.delta.is_some() || self.done
    }
}

/// A frame whose payload could not be decoded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("undecodable frame ({event_type:?}): {message}")]
pub struct DecodeError {
    /// SSE `event:` name of the frame.
    pub event_type: Option<String>,
    /// Parser error message.
    pub message: String,
    /// Leading part of the offending payload.
    pub snippet: String,
}

impl DecodeError {
    fn new(event: &SseEvent, err: serde_json::Error) -> Self {
        Self {
            event_type: event.event_type.clone(),
            message: err.to_string(),
            snippet: event.data.chars().take(200).collect(),
        }
    }
}

/// Wire shape of a message update; unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpdate {
    #[serde(default)]
    delta: Option<String>,
    #[serde(default, alias = "messageID")]
    message_id: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Decode one frame into a [`MessageUpdate`].
///
/// Returns `Ok(None)` for frames that carry neither a delta nor a completion
/// flag (heartbeats, empty `event:`-only frames, unrelated payloads).
pub fn decode_update(event: &SseEvent) -> Result<Option<MessageUpdate>, DecodeError> {
    if event.data.trim().is_empty() {
        return Ok(None);
    }

    let wire: WireUpdate =
        serde_json::from_str(&event.data).map_err(|e| DecodeError::new(event, e))?;

    let update = MessageUpdate {
        delta: wire.delta,
        message_id: wire.message_id.unwrap_or_default(),
        done: wire.done,
        event_type: event.event_type.clone(),
    };

    Ok(update.is_meaningful().then_some(update))
}

/// An event from the server-wide event bus (`GET /event`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event name, e.g. `message.part.updated` or `session.idle`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ServerEvent {
    /// Session the event refers to, if its payload names one.
    pub fn session_id(&self) -> Option<&str> {
        let props = &self.properties;
        props
            .get("sessionID")
            .or_else(|| props.get("info").and_then(|i| i.get("sessionID")))
            .or_else(|| props.get("part").and_then(|p| p.get("sessionID")))
            .and_then(|v| v.as_str())
    }
}

/// Decode one frame from the event bus.
pub fn decode_server_event(event: &SseEvent) -> Result<Option<ServerEvent>, DecodeError> {
    if event.data.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&event.data)
        .map(Some)
        .map_err(|e| DecodeError::new(event, e))
}
