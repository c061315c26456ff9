//! WebSocket transport
//!
//! Each transport owns one socket task. The task forwards inbound text frames
//! as events and drains an outbound queue fed by [`WsTransport::send`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Connector, Transport, TransportError, TransportEvent, TransportEvents};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connects to the controller endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self, events: TransportEvents) -> Box<dyn Transport> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(self.url.clone(), events, outbound_rx));
        Box::new(WsTransport {
            outbound: outbound_tx,
            task: Some(task),
        })
    }
}

enum Outbound {
    Frame(String),
    Close,
}

/// Handle to a socket task
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, raw: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(raw))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                debug!("Socket task did not finish closing, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    info!("Connecting to controller at {} ({})", url, events.id());

    let socket = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(e)) => {
            events.emit(TransportEvent::Errored(TransportError::Connect(e.to_string())));
            return;
        }
        Err(_) => {
            events.emit(TransportEvent::Errored(TransportError::Connect(
                "connect timed out".to_string(),
            )));
            return;
        }
    };

    events.emit(TransportEvent::Opened);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if serde_json::from_str::<serde::de::IgnoredAny>(&text).is_err() {
                        debug!("Dropping non-JSON frame: {}", text);
                        continue;
                    }
                    events.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(_))) | None => {
                    events.emit(TransportEvent::Closed);
                    return;
                }
                Some(Ok(other)) => {
                    debug!("Ignoring non-text frame ({} bytes)", other.len());
                }
                Some(Err(e)) => {
                    events.emit(TransportEvent::Errored(TransportError::Receive(e.to_string())));
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Frame(raw)) => {
                    if let Err(e) = sink.send(Message::Text(raw)).await {
                        warn!("Write to controller failed: {}", e);
                        events.emit(TransportEvent::Errored(TransportError::Send(e.to_string())));
                        let _ = sink.close().await;
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    }
}
