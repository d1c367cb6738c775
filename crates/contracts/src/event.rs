//! Stream-level event records
//!
//! `StreamSignal` is what a remote stream delivers; `TypedEvent` is the
//! decoded payload of a per-build `BuildEvent`.

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Named SSE event carrying a build summary on the top-level stream
pub const BUILD_EVENT_NAME: &str = "Build";

/// Named SSE event carrying a timeline event on a per-build stream
pub const BUILD_TIMELINE_EVENT_NAME: &str = "BuildEvent";

/// Signal surfaced by a remote event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// Connection established (once per connection attempt)
    Open,

    /// A named event with its raw payload text
    Event { name: String, data: String },

    /// Connection failed or ended; may recur if the source reconnects
    Error { message: String },
}

impl StreamSignal {
    pub fn event(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Event {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Single timestamped build-lifecycle event.
///
/// Read-only to extractors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedEvent {
    /// Event type name (e.g. `BuildStarted`)
    pub event_type: String,

    /// Epoch milliseconds as reported by the server
    pub timestamp: i64,

    /// Type-specific payload
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: WireEventType,
    timestamp: i64,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventType {
    event_type: String,
}

impl TypedEvent {
    pub fn new(event_type: impl Into<String>, timestamp: i64, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            data,
        }
    }

    /// Decode a `BuildEvent` payload: `{ type: { eventType }, timestamp, data }`
    pub fn from_payload(payload: &str) -> Result<Self, ContractError> {
        let wire: WireEvent = serde_json::from_str(payload)
            .map_err(|e| ContractError::payload_parse(BUILD_TIMELINE_EVENT_NAME, e.to_string()))?;

        Ok(Self {
            event_type: wire.kind.event_type,
            timestamp: wire.timestamp,
            data: wire.data,
        })
    }
}
