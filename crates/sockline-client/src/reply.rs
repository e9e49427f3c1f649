//! Handle to an inbound exchange.

use serde_json::Value;
use sockline_core::SessionId;
use sockline_core::wire::{FLOW_ID, flow_id_of};

use crate::connection::{Connection, Outbound};
use crate::errors::Result;
use crate::options::SendOptions;

/// An inbound exchange: a server push, or the response to one of our
/// requests.
///
/// Answering goes out under `session_id + 1` without an action. The flow id
/// is copied into object payloads that do not carry their own `"flow-id"`.
#[derive(Clone, Debug)]
pub struct Reply {
    connection: Connection,
    session_id: SessionId,
    action: Option<String>,
    payload: Value,
    flow_id: Option<Value>,
}

impl Reply {
    pub(crate) fn new(
        connection: Connection,
        session_id: SessionId,
        action: Option<String>,
        payload: Value,
        flow_id: Option<Value>,
    ) -> Self {
        let flow_id = flow_id.or_else(|| flow_id_of(&payload));
        Self {
            connection,
            session_id,
            action,
            payload,
            flow_id,
        }
    }

    /// Session id this exchange arrived under.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Push action, `None` for responses.
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Inbound payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consume the reply, keeping only the payload.
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Flow id this exchange belongs to.
    pub fn flow_id(&self) -> Option<&Value> {
        self.flow_id.as_ref()
    }

    /// Answer and wait for the peer's response.
    pub async fn reply(&self, payload: Value) -> Result<Reply> {
        self.reply_with(payload, SendOptions::default()).await
    }

    /// [`reply`](Self::reply) with options.
    pub async fn reply_with(&self, payload: Value, options: SendOptions) -> Result<Reply> {
        self.connection.request(self.answer(payload, options)).await
    }

    /// Answer without waiting for a response.
    pub fn end(&self, payload: Value) -> Result<()> {
        self.end_with(payload, SendOptions::default())
    }

    /// [`end`](Self::end) with options.
    pub fn end_with(&self, payload: Value, options: SendOptions) -> Result<()> {
        self.connection.post(self.answer(payload, options))
    }

    fn answer(&self, payload: Value, options: SendOptions) -> Outbound {
        Outbound {
            session_id: Some(self.session_id.response_id()),
            action: None,
            payload: self.with_flow(payload),
            options,
        }
    }

    fn with_flow(&self, payload: Value) -> Value {
        match (payload, &self.flow_id) {
            (Value::Object(mut map), Some(flow)) => {
                if !map.contains_key(FLOW_ID) {
                    let _ = map.insert(FLOW_ID.to_owned(), flow.clone());
                }
                Value::Object(map)
            }
            (payload, _) => payload,
        }
    }
}
