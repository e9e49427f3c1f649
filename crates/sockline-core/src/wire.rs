//! JSON wire frames and inbound classification.
//!
//! Outbound frames:
//! - request: `{"session-id": <id>, "data": <payload>, "action"?: <verb>}`
//! - acknowledgment: `{"confirm-id": <id>}`
//!
//! Inbound frames are classified in priority order: acknowledgment, push,
//! response candidate. Whether a response candidate matches a pending
//! request is decided by the owner of the request table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::SessionId;

/// Member carrying the acknowledged id.
pub const CONFIRM_ID: &str = "confirm-id";
/// Member carrying the correlation id.
pub const SESSION_ID: &str = "session-id";
/// Member carrying the optional flow grouping key inside a payload.
pub const FLOW_ID: &str = "flow-id";

/// Frame encoding/decoding failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not valid JSON or had mistyped members.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Serialize)]
struct RequestFrame<'a> {
    #[serde(rename = "session-id")]
    session_id: SessionId,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfirmFrame {
    #[serde(rename = "confirm-id")]
    confirm_id: SessionId,
}

/// Serialize an outbound request frame.
pub fn encode_request(session_id: SessionId, action: Option<&str>, data: &Value) -> Result<String> {
    Ok(serde_json::to_string(&RequestFrame {
        session_id,
        data,
        action,
    })?)
}

/// Serialize an acknowledgment frame.
pub fn encode_confirm(session_id: SessionId) -> Result<String> {
    Ok(serde_json::to_string(&ConfirmFrame {
        confirm_id: session_id,
    })?)
}

/// Read the flow grouping key out of a payload, if it is an object carrying one.
pub fn flow_id_of(payload: &Value) -> Option<Value> {
    payload.get(FLOW_ID).filter(|v| !v.is_null()).cloned()
}

/// A decoded inbound frame before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Acknowledged request id.
    #[serde(rename = "confirm-id", default)]
    pub confirm_id: Option<SessionId>,
    /// Correlation id.
    #[serde(rename = "session-id", default)]
    pub session_id: Option<SessionId>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Verb, present on pushes.
    #[serde(default)]
    pub action: Option<String>,
}

/// What an inbound frame means.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// The peer acknowledged one of our requests.
    Confirm {
        /// The acknowledged request id.
        session_id: SessionId,
    },
    /// A server-initiated exchange.
    Push {
        /// The push id; answers use `session_id + 1`.
        session_id: SessionId,
        /// Handler name to dispatch to.
        action: Option<String>,
        /// Payload.
        data: Value,
    },
    /// A possible answer to one of our requests.
    Response {
        /// The response id (`request + 1`).
        session_id: SessionId,
        /// Payload.
        data: Value,
    },
    /// Neither id member present.
    Unroutable,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Classify the frame in protocol priority order.
    pub fn classify(self) -> FrameKind {
        if let Some(session_id) = self.confirm_id {
            return FrameKind::Confirm { session_id };
        }
        match self.session_id {
            Some(session_id) if session_id.is_push() => FrameKind::Push {
                session_id,
                action: self.action,
                data: self.data,
            },
            Some(session_id) => FrameKind::Response {
                session_id,
                data: self.data,
            },
            None => FrameKind::Unroutable,
        }
    }
}
