//! Connection management module
//!
//! A transport is a duplex text channel to the controller. It reports what
//! happens to it as [`TransportEvent`]s tagged with the id of the connection
//! that produced them, so the session can ignore a transport it has already
//! discarded.

pub mod websocket;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use websocket::{WsConnector, WsTransport};

/// Transport error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Transport is closed")]
    Closed,
}

/// Identifies one transport instance for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a transport reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Errored(TransportError),
    Closed,
}

/// Event sink handed to a transport when it is created
#[derive(Debug, Clone)]
pub struct TransportEvents {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Deliver an event; returns false once the session is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.id, event)).is_ok()
    }
}

/// An open (or opening) channel to the controller
#[async_trait]
pub trait Transport: Send {
    /// Queue one text message
    async fn send(&mut self, raw: String) -> Result<(), TransportError>;

    /// Close the channel; no events are expected afterwards
    async fn close(&mut self);
}

/// Creates transports. Connecting is asynchronous: the transport reports
/// `Opened` or `Errored` through its event sink.
pub trait Connector: Send + Sync {
    fn connect(&self, events: TransportEvents) -> Box<dyn Transport>;
}
