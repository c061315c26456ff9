//! Shared fixtures: an in-memory transport and a fake controller

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use xagent::connection::ConnectionId;
use xagent::{
    AgentConfig, AgentSession, CommandExecutor, Connector, Monitor, SessionExit, SessionSnapshot,
    Transport, TransportError, TransportEvent, TransportEvents,
};
use xagent_proto::{build, Identity, MessageKind};

pub const SECRET: &str = "integration-secret";

pub fn identity() -> Identity {
    Identity::new("42", SECRET, "test-host")
}

pub fn config() -> AgentConfig {
    AgentConfig {
        server: "ws://controller.invalid".to_string(),
        app_id: "42".to_string(),
        secret: SECRET.to_string(),
        logdir: Some(PathBuf::from("/tmp")),
        heartbeat_interval: Some(10.0),
        reconnect_delay_base: Some(3.0),
        reconnect_delay_max: Some(10.0),
        register_retry_delay: Some(5.0),
        report_interval: Some(60.0),
        ..AgentConfig::default()
    }
}

/// One transport handed out by [`TestConnector`]
#[derive(Clone)]
pub struct TestConnection {
    pub events: TransportEvents,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl TestConnection {
    pub fn id(&self) -> ConnectionId {
        self.events.id()
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.emit(event);
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn deliver(&self, raw: String) {
        self.emit(TransportEvent::Message(raw));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Everything the agent sent on this transport, parsed
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn sent_raw(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|message| message["type"] == kind)
            .collect()
    }
}

struct TestTransport {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for TestTransport {
    async fn send(&mut self, raw: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(raw);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every transport the session creates
#[derive(Default)]
pub struct TestConnector {
    connections: Mutex<Vec<TestConnection>>,
}

impl TestConnector {
    pub fn connections(&self) -> Vec<TestConnection> {
        self.connections.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn latest(&self) -> TestConnection {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection created yet")
    }
}

impl Connector for TestConnector {
    fn connect(&self, events: TransportEvents) -> Box<dyn Transport> {
        let connection = TestConnection {
            events,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let transport = TestTransport {
            sent: connection.sent.clone(),
            closed: connection.closed.clone(),
        };
        self.connections.lock().unwrap().push(connection);
        Box::new(transport)
    }
}

/// A running session and the handles to observe it
pub struct Harness {
    pub connector: Arc<TestConnector>,
    pub snapshot: watch::Receiver<SessionSnapshot>,
    pub handle: JoinHandle<xagent::Result<SessionExit>>,
}

impl Harness {
    pub fn start(config: AgentConfig, executor: CommandExecutor, monitors: Vec<Box<dyn Monitor>>) -> Self {
        let connector = Arc::new(TestConnector::default());
        let mut session = AgentSession::new(config, identity(), connector.clone(), executor);
        for monitor in monitors {
            session.register_monitor(monitor);
        }
        let snapshot = session.snapshot();
        let handle = tokio::spawn(session.run());
        Self {
            connector,
            snapshot,
            handle,
        }
    }

    pub fn default_session() -> Self {
        Self::start(config(), CommandExecutor::with_helper_dir(helper_dir()), Vec::new())
    }

    pub fn state(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Open the first transport and complete registration
    pub async fn register(&self) -> TestConnection {
        settle().await;
        let connection = self.connector.latest();
        connection.open();
        settle().await;
        connection.deliver(controller(MessageKind::Result, json!({"result": "REG_OK"}), None));
        settle().await;
        connection
    }
}

/// Let every ready task run; advances a paused clock by one millisecond
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A message signed the way the controller signs it
pub fn controller(kind: MessageKind, params: Value, trace_id: Option<&str>) -> String {
    let controller = Identity::new("42", SECRET, "controller");
    build(kind, params, &controller, 1, trace_id.map(str::to_string))
        .unwrap()
        .to_json()
        .unwrap()
}

/// Same message under the wrong key
pub fn forged(kind: MessageKind, params: Value) -> String {
    let controller = Identity::new("42", "not-the-secret", "controller");
    build(kind, params, &controller, 1, None)
        .unwrap()
        .to_json()
        .unwrap()
}

/// Directory the cargo-built helper binaries live in
pub fn helper_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_check_file"))
        .parent()
        .unwrap()
        .to_path_buf()
}
