//! Agent session
//!
//! The session owns the transport and drives registration, heartbeats,
//! reconnects and command dispatch. Transport events, timer firings,
//! command completions and monitor reports all arrive on channels drained by
//! a single loop, so handlers never run concurrently.

pub mod timers;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use xagent_proto::{
    build, CommandResult, ControllerMessage, HeartbeatParams, Identity, Inbound, MessageIds,
    MessageKind, RegisterParams, ResultAck,
};

use crate::config::AgentConfig;
use crate::connection::{ConnectionId, Connector, Transport, TransportEvent, TransportEvents};
use crate::executor::{CommandExecutor, CommandInvocation};
use crate::monitor::{Monitor, MonitorReport, MonitorScheduler};
use crate::{AgentError, Result, AGENT_VERSION};

pub use timers::{TimerFired, TimerKind, Timers};

/// Unacknowledged heartbeats tolerated before reconnecting
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Init,
    Registering,
    Work,
    Closed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentState::Init => "INIT",
            AgentState::Registering => "REGISTERING",
            AgentState::Work => "WORK",
            AgentState::Closed => "CLOSED",
        })
    }
}

/// Why [`AgentSession::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The controller sent a verified `shutdown`
    Shutdown,
}

/// Observable session state, published after every handled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: AgentState,
    pub heartbeat_miss_count: u32,
    pub live_timers: Vec<TimerKind>,
    pub connection: Option<ConnectionId>,
    pub transports_opened: u64,
    pub monitors_started: bool,
    pub shutdown: bool,
}

struct ActiveTransport {
    id: ConnectionId,
    inner: Box<dyn Transport>,
}

struct CommandFinished {
    trace_id: String,
    result: CommandResult,
}

pub struct AgentSession {
    config: AgentConfig,
    identity: Identity,
    connector: Arc<dyn Connector>,
    executor: CommandExecutor,

    state: AgentState,
    heartbeat_miss_count: u32,
    /// Set once by `shutdown`; no reconnect is scheduled afterwards
    shutdown: bool,
    transport: Option<ActiveTransport>,
    next_connection: u64,
    transports_opened: u64,
    ids: MessageIds,
    timers: Timers,
    scheduler: MonitorScheduler,
    commands: JoinSet<()>,

    transport_tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    command_tx: mpsc::UnboundedSender<CommandFinished>,
    command_rx: mpsc::UnboundedReceiver<CommandFinished>,
    report_tx: mpsc::UnboundedSender<MonitorReport>,
    report_rx: mpsc::UnboundedReceiver<MonitorReport>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl AgentSession {
    pub fn new(
        config: AgentConfig,
        identity: Identity,
        connector: Arc<dyn Connector>,
        executor: CommandExecutor,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            state: AgentState::Init,
            heartbeat_miss_count: 0,
            live_timers: Vec::new(),
            connection: None,
            transports_opened: 0,
            monitors_started: false,
            shutdown: false,
        });

        Self {
            config,
            identity,
            connector,
            executor,
            state: AgentState::Init,
            heartbeat_miss_count: 0,
            shutdown: false,
            transport: None,
            next_connection: 1,
            transports_opened: 0,
            ids: MessageIds::new(),
            timers: Timers::new(timer_tx),
            scheduler: MonitorScheduler::new(),
            commands: JoinSet::new(),
            transport_tx,
            transport_rx,
            timer_rx,
            command_tx,
            command_rx,
            report_tx,
            report_rx,
            snapshot_tx,
        }
    }

    /// Add a monitor; monitors start on the first successful registration
    pub fn register_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.scheduler.register(monitor);
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Connect and process events until the controller shuts the agent down
    pub async fn run(mut self) -> Result<SessionExit> {
        info!(
            "Starting session for agent {} (app {}) against {}",
            self.identity.agent_id, self.identity.app_id, self.config.server
        );
        self.connect();
        self.publish();

        loop {
            tokio::select! {
                Some((id, event)) = self.transport_rx.recv() => self.on_transport_event(id, event).await,
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired).await,
                Some(done) = self.command_rx.recv() => self.on_command_finished(done).await,
                Some(report) = self.report_rx.recv() => self.on_report(report).await,
                else => return Err(AgentError::Other("session channels closed".to_string())),
            }
            self.publish();

            if self.shutdown {
                info!("Session finished");
                return Ok(SessionExit::Shutdown);
            }
        }
    }

    fn connect(&mut self) {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;

        let events = TransportEvents::new(id, self.transport_tx.clone());
        let inner = self.connector.connect(events);
        self.transport = Some(ActiveTransport { id, inner });
        self.transports_opened += 1;
        self.state = AgentState::Init;
        debug!("Created transport {}", id);
    }

    async fn on_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if self.transport.as_ref().map(|t| t.id) != Some(id) {
            debug!("Ignoring {:?} from discarded transport {}", event, id);
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open().await,
            TransportEvent::Message(raw) => self.on_message(&raw).await,
            TransportEvent::Errored(e) => {
                error!("Transport error: {}", e);
                self.reconnect().await;
            }
            TransportEvent::Closed => {
                error!("Connection closed");
                self.reconnect().await;
            }
        }
    }

    async fn on_open(&mut self) {
        if self.state != AgentState::Init {
            warn!("Transport opened in state {}, ignoring", self.state);
            return;
        }
        info!("Connected to controller");
        self.state = AgentState::Registering;
        self.send_register().await;
        self.timers
            .repeating(TimerKind::RegisterRetry, self.config.register_retry_delay());
    }

    async fn on_message(&mut self, raw: &str) {
        debug!("<<< {}", raw);

        let (id, message) = match xagent_proto::decode(&self.identity.secret, raw) {
            Ok(Inbound::Verified { id, message }) => (id, message),
            Ok(Inbound::UnsignedError(text)) => {
                error!("Controller reported an error: {}", text);
                return;
            }
            Err(e) => {
                warn!("Dropping message: {}", e);
                return;
            }
        };

        match message {
            ControllerMessage::Result(ResultAck::RegisterOk) => self.on_registered(),
            ControllerMessage::Result(ResultAck::HeartbeatAck) => {
                self.heartbeat_miss_count = 0;
            }
            ControllerMessage::Result(ResultAck::Other(params)) => {
                debug!("Unhandled result {} (message id {:?})", params, id);
            }
            ControllerMessage::Command { params, trace_id } => {
                self.dispatch_command(params, trace_id);
            }
            ControllerMessage::Shutdown => self.on_shutdown().await,
            ControllerMessage::Error(text) => {
                error!("Controller error (message id {:?}): {}", id, text);
            }
            ControllerMessage::Unsupported { kind } => {
                error!("Message type {} not supported", kind);
            }
        }
    }

    fn on_registered(&mut self) {
        if self.state != AgentState::Registering {
            warn!("Ignoring REG_OK in state {}", self.state);
            return;
        }
        info!("Agent registered");
        self.state = AgentState::Work;
        self.timers.cancel(TimerKind::RegisterRetry);

        self.heartbeat_miss_count = 0;
        self.timers
            .repeating(TimerKind::Heartbeat, self.config.heartbeat_interval());

        if !self.scheduler.is_started() {
            self.scheduler.start(&self.config, self.report_tx.clone());
        }
    }

    async fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(&fired) {
            debug!("Discarding stale {} timer", fired.kind);
            return;
        }

        match fired.kind {
            TimerKind::Heartbeat => self.on_heartbeat_tick().await,
            TimerKind::RegisterRetry => {
                if self.state == AgentState::Registering {
                    self.send_register().await;
                }
            }
            TimerKind::Reconnect => {
                if !self.shutdown {
                    self.connect();
                }
            }
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        if self.heartbeat_miss_count >= MAX_MISSED_HEARTBEATS {
            error!("Heartbeat missed {} times", self.heartbeat_miss_count);
            self.reconnect().await;
            return;
        }

        if self.state == AgentState::Work {
            let params = HeartbeatParams {
                interval: self.config.heartbeat_interval().as_millis() as u64,
            };
            self.send(MessageKind::Heartbeat, &params, None).await;
            self.heartbeat_miss_count += 1;
        }
    }

    fn dispatch_command(&mut self, params: Value, trace_id: Option<String>) {
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!("Execute command {}, traceId: {}", params, trace_id);

        let invocation = CommandInvocation::from_params(
            &params,
            trace_id.clone(),
            self.config.logdir.as_deref(),
            &self.identity.agent_id,
        );
        let executor = self.executor.clone();
        let done = self.command_tx.clone();

        self.commands.spawn(async move {
            let result = match invocation {
                Ok(invocation) => match executor.run(&invocation).await {
                    Ok(output) => CommandResult::completed(output.stdout, output.stderr),
                    Err(e) => CommandResult::failed(e.to_string()),
                },
                Err(e) => CommandResult::failed(e.to_string()),
            };
            let _ = done.send(CommandFinished { trace_id, result });
        });
    }

    async fn on_command_finished(&mut self, done: CommandFinished) {
        while self.commands.try_join_next().is_some() {}

        if !done.result.ok {
            warn!(
                "Command failed (traceId {}): {}",
                done.trace_id,
                done.result.message.as_deref().unwrap_or("")
            );
        }
        self.send(MessageKind::Result, &done.result, Some(done.trace_id))
            .await;
    }

    async fn on_report(&mut self, report: MonitorReport) {
        if !self.send(MessageKind::Log, &report.params, None).await {
            debug!("Report from {} dropped while disconnected", report.monitor);
        }
    }

    async fn on_shutdown(&mut self) {
        warn!("Shutdown requested by controller");
        self.shutdown = true;
        self.timers.cancel_all();
        self.scheduler.stop();
        self.commands.abort_all();
        self.teardown().await;
    }

    /// Tear down and schedule a new transport after a random delay
    async fn reconnect(&mut self) {
        self.teardown().await;
        if self.shutdown {
            return;
        }
        let delay = reconnect_delay(
            self.config.reconnect_delay_base(),
            self.config.reconnect_delay_max(),
        );
        info!("Trying to connect after {:.3}s", delay.as_secs_f64());
        self.timers.once(TimerKind::Reconnect, delay);
    }

    async fn teardown(&mut self) {
        self.timers.cancel(TimerKind::Heartbeat);
        self.timers.cancel(TimerKind::RegisterRetry);
        self.state = AgentState::Closed;
        if let Some(mut transport) = self.transport.take() {
            debug!("Closing transport {}", transport.id);
            transport.inner.close().await;
        }
    }

    async fn send_register(&mut self) {
        info!("Sending register");
        let params = RegisterParams {
            version: AGENT_VERSION.to_string(),
            pid: std::process::id(),
        };
        self.send(MessageKind::Register, &params, None).await;
    }

    /// Sign and send; returns false when nothing was sent
    async fn send<P: Serialize>(
        &mut self,
        kind: MessageKind,
        params: &P,
        trace_id: Option<String>,
    ) -> bool {
        if !matches!(self.state, AgentState::Registering | AgentState::Work) {
            debug!("Not connected, dropping {}", kind);
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            debug!("No transport, dropping {}", kind);
            return false;
        };

        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                error!("Failed to encode {} params: {}", kind, e);
                return false;
            }
        };
        let envelope = match build(kind, params, &self.identity, self.ids.next_id(), trace_id) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to build {} message: {}", kind, e);
                return false;
            }
        };
        let raw = match envelope.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to serialize {} message: {}", kind, e);
                return false;
            }
        };

        debug!(">>> {}", raw);
        match transport.inner.send(raw).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {}: {}", kind, e);
                false
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            state: self.state,
            heartbeat_miss_count: self.heartbeat_miss_count,
            live_timers: self.timers.live(),
            connection: self.transport.as_ref().map(|t| t.id),
            transports_opened: self.transports_opened,
            monitors_started: self.scheduler.is_started(),
            shutdown: self.shutdown,
        });
    }
}

/// Uniform in `[base, max)`; exactly `base` when the range is empty
fn reconnect_delay(base: Duration, max: Duration) -> Duration {
    if base >= max {
        return base;
    }
    rand::thread_rng().gen_range(base..max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_stays_in_range() {
        let base = Duration::from_secs(3);
        let max = Duration::from_secs(10);
        for _ in 0..1000 {
            let delay = reconnect_delay(base, max);
            assert!(delay >= base && delay < max, "delay {delay:?}");
        }
    }

    #[test]
    fn test_reconnect_delay_collapsed_range() {
        let base = Duration::from_millis(2500);
        assert_eq!(reconnect_delay(base, base), base);
        assert_eq!(reconnect_delay(base, Duration::from_secs(1)), base);
    }
}
