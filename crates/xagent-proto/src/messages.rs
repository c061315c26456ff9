//! Typed message payloads and inbound classification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::parse_object;
use crate::signature::{SIGNATURE_FIELD, verify};
use crate::ProtocolError;

/// Message types understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    Result,
    Heartbeat,
    Command,
    Log,
    Shutdown,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Register => "register",
            MessageKind::Result => "result",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Command => "command",
            MessageKind::Log => "log",
            MessageKind::Shutdown => "shutdown",
            MessageKind::Error => "error",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "register" => Some(MessageKind::Register),
            "result" => Some(MessageKind::Result),
            "heartbeat" => Some(MessageKind::Heartbeat),
            "command" => Some(MessageKind::Command),
            "log" => Some(MessageKind::Log),
            "shutdown" => Some(MessageKind::Shutdown),
            "error" => Some(MessageKind::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `register` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub version: String,
    pub pid: u32,
}

/// `heartbeat` params; `interval` is in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatParams {
    pub interval: u64,
}

/// Captured helper output carried by a successful command result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutputData {
    pub stdout: String,
    pub stderr: String,
}

/// `result` params sent in reply to a `command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandOutputData>,
}

impl CommandResult {
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: None,
            data: Some(CommandOutputData {
                stdout: stdout.into(),
                stderr: stderr.into(),
            }),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Acknowledgements carried in controller `result` messages
#[derive(Debug, Clone, PartialEq)]
pub enum ResultAck {
    RegisterOk,
    HeartbeatAck,
    Other(Value),
}

/// A verified message from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerMessage {
    Result(ResultAck),
    /// Raw `command` params; parsed by the dispatcher so malformed commands
    /// can still be answered under their trace id
    Command {
        params: Value,
        trace_id: Option<String>,
    },
    Shutdown,
    /// A signed error report
    Error(String),
    Unsupported {
        kind: String,
    },
}

/// Outcome of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Verified {
        id: Option<Value>,
        message: ControllerMessage,
    },
    /// `type:"error"` without a signature: informational only
    UnsignedError(String),
}

/// Decode and authenticate one inbound frame.
pub fn decode(secret: &str, raw: &str) -> Result<Inbound, ProtocolError> {
    let message = parse_object(raw)?;

    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing 'type'".to_string()))?
        .to_string();
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    if !message.contains_key(SIGNATURE_FIELD) {
        if kind == MessageKind::Error.as_str() {
            return Ok(Inbound::UnsignedError(error_text(&params)));
        }
        return Err(ProtocolError::Unsigned(kind));
    }

    if !verify(secret, &message) {
        return Err(ProtocolError::SignatureMismatch(id_text(&message)));
    }

    let trace_id = message
        .get("traceId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let decoded = match MessageKind::parse(&kind) {
        Some(MessageKind::Result) => ControllerMessage::Result(result_ack(params)),
        Some(MessageKind::Command) => ControllerMessage::Command { params, trace_id },
        Some(MessageKind::Shutdown) => ControllerMessage::Shutdown,
        Some(MessageKind::Error) => ControllerMessage::Error(error_text(&params)),
        _ => ControllerMessage::Unsupported { kind },
    };

    Ok(Inbound::Verified {
        id: message.get("id").cloned(),
        message: decoded,
    })
}

fn result_ack(params: Value) -> ResultAck {
    match params.get("result").and_then(Value::as_str) {
        Some("REG_OK") => ResultAck::RegisterOk,
        Some("HEARTBEAT_ACK") => ResultAck::HeartbeatAck,
        _ => ResultAck::Other(params),
    }
}

fn error_text(params: &Value) -> String {
    match params.get("error") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "signature unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

fn id_text(message: &Map<String, Value>) -> String {
    message
        .get("id")
        .map(Value::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}
