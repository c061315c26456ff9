//! xagent wire protocol
//!
//! Every message exchanged with the controller is a JSON envelope carrying the
//! sender identity, a correlation `traceId` and an HMAC signature computed over
//! the canonical serialization of the remaining fields.
//!
//! Key properties:
//! - Field order is part of the signature contract
//! - Inbound messages are verified in the order the controller sent them
//! - Unsigned `error` reports are accepted but never acted upon

pub mod envelope;
pub mod messages;
pub mod signature;

pub use envelope::{Envelope, Identity, MessageIds, build};
pub use messages::{
    CommandOutputData, CommandResult, ControllerMessage, HeartbeatParams, Inbound, MessageKind, RegisterParams,
    ResultAck, decode,
};
pub use signature::{SIGNATURE_FIELD, sign, verify};

/// Protocol error types
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unsigned '{0}' message rejected")]
    Unsigned(String),

    #[error("Signature mismatch for message id {0}")]
    SignatureMismatch(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
