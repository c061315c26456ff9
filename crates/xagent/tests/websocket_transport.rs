//! WebSocket transport against a local controller

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use xagent::connection::{ConnectionId, WsConnector};
use xagent::{
    AgentConfig, AgentSession, CommandExecutor, Connector, TransportEvent, TransportEvents,
};
use xagent_proto::{build, Identity, MessageKind};

const SECRET: &str = "ws-secret";

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .1
}

#[tokio::test]
async fn test_transport_round_trip() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text("{\"type\":\"result\"}".to_string())).await.unwrap();
        let frame = ws.next().await.unwrap().unwrap();
        ws.close(None).await.ok();
        frame.into_text().unwrap()
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = WsConnector::new(url).connect(TransportEvents::new(ConnectionId(1), tx));

    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    // The non-JSON frame is dropped
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Message("{\"type\":\"result\"}".to_string())
    );

    transport.send("{\"hello\":1}".to_string()).await.unwrap();
    assert_eq!(server.await.unwrap(), "{\"hello\":1}");
    assert_eq!(next_event(&mut rx).await, TransportEvent::Closed);

    transport.close().await;
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let (listener, url) = listener().await;
    drop(listener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _transport = WsConnector::new(url).connect(TransportEvents::new(ConnectionId(7), tx));

    assert!(matches!(
        next_event(&mut rx).await,
        TransportEvent::Errored(xagent::TransportError::Connect(_))
    ));
}

#[tokio::test]
async fn test_session_registers_over_websocket() {
    let (listener, url) = listener().await;

    let config = AgentConfig {
        server: url.clone(),
        app_id: "7".to_string(),
        secret: SECRET.to_string(),
        logdir: Some(std::env::temp_dir()),
        ..AgentConfig::default()
    };
    let identity = Identity::new("7", SECRET, "ws-host");
    let session = AgentSession::new(
        config,
        identity,
        Arc::new(WsConnector::new(url)),
        CommandExecutor::with_helper_dir(std::env::temp_dir()),
    );
    let mut snapshot = session.snapshot();
    let agent = tokio::spawn(session.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let register: Value = serde_json::from_str(&frame.into_text().unwrap()).unwrap();
    assert_eq!(register["type"], "register");
    assert_eq!(register["appId"], "7");
    assert_eq!(register["agentId"], "ws-host");
    assert!(xagent_proto::verify(SECRET, register.as_object().unwrap()));

    let controller = Identity::new("7", SECRET, "controller");
    let reply = |kind, params| {
        build(kind, params, &controller, 1, None)
            .unwrap()
            .to_json()
            .unwrap()
    };

    ws.send(Message::Text(reply(MessageKind::Result, json!({"result": "REG_OK"}))))
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshot.wait_for(|s| s.state == xagent::AgentState::Work),
    )
    .await
    .unwrap()
    .unwrap();

    ws.send(Message::Text(reply(MessageKind::Shutdown, json!({}))))
        .await
        .unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), agent)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, xagent::SessionExit::Shutdown);
}
