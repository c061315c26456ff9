//! Outbound envelope construction

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::signature::{sign, verify};
use crate::{MessageKind, ProtocolError};

/// First value handed out by [`MessageIds`]
pub const FIRST_MESSAGE_ID: u64 = 1000;

/// Who the agent is, as far as the controller is concerned
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub app_id: String,
    pub secret: String,
    pub agent_id: String,
}

impl Identity {
    pub fn new(
        app_id: impl Into<String>,
        secret: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

/// Monotonic message id source.
///
/// Ids are only used to correlate log lines, so uniqueness is per process and
/// the counter never resets across reconnects.
#[derive(Debug)]
pub struct MessageIds {
    next: AtomicU64,
}

impl MessageIds {
    pub fn new() -> Self {
        Self::starting_at(FIRST_MESSAGE_ID)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

/// A protocol message.
///
/// Field declaration order is the serialization order and therefore the order
/// the signature is computed over. Do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
    pub app_id: String,
    pub agent_id: String,
    pub id: u64,
    pub trace_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Recompute the signature of this envelope and compare it
    pub fn verify(&self, secret: &str) -> bool {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => verify(secret, &map),
            _ => false,
        }
    }

    fn sign_with(mut self, secret: &str) -> Result<Self, ProtocolError> {
        self.signature = None;
        self.signature = Some(sign(secret, &self)?);
        Ok(self)
    }
}

/// Build a signed envelope.
///
/// `trace_id` is generated when absent; replies pass the request's trace id.
pub fn build(
    kind: MessageKind,
    params: Value,
    identity: &Identity,
    id: u64,
    trace_id: Option<String>,
) -> Result<Envelope, ProtocolError> {
    Envelope {
        kind: kind.as_str().to_string(),
        params,
        app_id: identity.app_id.clone(),
        agent_id: identity.agent_id.clone(),
        id,
        trace_id: trace_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        timestamp: chrono::Utc::now().timestamp_millis(),
        signature: None,
    }
    .sign_with(&identity.secret)
}

/// Parse raw text into a JSON object, keeping key order intact
pub(crate) fn parse_object(raw: &str) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ProtocolError::Malformed(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
