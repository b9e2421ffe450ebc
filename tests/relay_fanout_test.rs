//! End-to-end relay tests over real WebSocket connections

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use wsrelay::metrics::Metrics;
use wsrelay::{Config, ConnectionManager};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Reserve an ephemeral port by binding and immediately releasing it
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Start a relay on the given ports and return the bound addresses
async fn start_relay(port_in: u16, port_out: u16) -> (SocketAddr, Option<SocketAddr>) {
    let mut config = Config::default();
    config.server.bind_host = "127.0.0.1".parse().unwrap();
    config.server.port_in = port_in;
    config.server.port_out = port_out;

    let metrics = Arc::new(Metrics::new());
    let mut manager = ConnectionManager::new(Arc::new(config), metrics);
    manager.bind().await.expect("relay should bind");

    let source_addr = manager.source_addr().unwrap();
    let target_addr = manager.target_addr();

    tokio::spawn(async move {
        let _ = manager.run().await;
    });

    (source_addr, target_addr)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("client should connect");
    ws
}

/// Receive the next Text/Binary message within the deadline
async fn recv_message(ws: &mut WsClient) -> Message {
    timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("connection closed unexpectedly")
        .expect("websocket error")
}

/// Assert that no message arrives within a short window
async fn assert_silent(ws: &mut WsClient) {
    let result = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {:?}", result);
}

#[tokio::test]
async fn test_separate_ports_fan_out() {
    let (in_addr, out_addr) = start_relay(free_port().await, free_port().await).await;
    let out_addr = out_addr.expect("separate mode should bind a target listener");

    let mut sender = connect(in_addr).await;
    let mut t1 = connect(out_addr).await;
    let mut t2 = connect(out_addr).await;
    sleep(Duration::from_millis(150)).await;

    sender
        .send(Message::Text("hello".to_string()))
        .await
        .unwrap();

    assert_eq!(recv_message(&mut t1).await, Message::Text("hello".to_string()));
    assert_eq!(recv_message(&mut t2).await, Message::Text("hello".to_string()));

    // The sender itself receives nothing
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn test_binary_payload_is_byte_identical() {
    let (in_addr, out_addr) = start_relay(free_port().await, free_port().await).await;
    let out_addr = out_addr.unwrap();

    let mut sender = connect(in_addr).await;
    let mut receiver = connect(out_addr).await;
    sleep(Duration::from_millis(150)).await;

    let payload = vec![0u8, 1, 2, 127, 128, 255];
    sender
        .send(Message::Binary(payload.clone()))
        .await
        .unwrap();

    assert_eq!(recv_message(&mut receiver).await, Message::Binary(payload));
}

#[tokio::test]
async fn test_shared_port_echoes_to_others_only() {
    let (addr, out_addr) = start_relay(0, 0).await;
    assert!(out_addr.is_none(), "shared mode must not bind a second listener");

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    sleep(Duration::from_millis(150)).await;

    a.send(Message::Text("ping".to_string())).await.unwrap();

    assert_eq!(recv_message(&mut b).await, Message::Text("ping".to_string()));
    assert_eq!(recv_message(&mut c).await, Message::Text("ping".to_string()));
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_multiple_senders_fan_out_independently() {
    let (in_addr, out_addr) = start_relay(free_port().await, free_port().await).await;
    let out_addr = out_addr.unwrap();

    let mut s1 = connect(in_addr).await;
    let mut s2 = connect(in_addr).await;
    let mut receiver = connect(out_addr).await;
    sleep(Duration::from_millis(150)).await;

    s1.send(Message::Text("from s1".to_string())).await.unwrap();
    s2.send(Message::Text("from s2".to_string())).await.unwrap();

    // No ordering guarantee across source connections
    let mut received = vec![
        recv_message(&mut receiver).await.into_text().unwrap(),
        recv_message(&mut receiver).await.into_text().unwrap(),
    ];
    received.sort();

    assert_eq!(received, vec!["from s1".to_string(), "from s2".to_string()]);
}

#[tokio::test]
async fn test_disconnected_target_does_not_affect_remaining() {
    let (in_addr, out_addr) = start_relay(free_port().await, free_port().await).await;
    let out_addr = out_addr.unwrap();

    let mut sender = connect(in_addr).await;
    let mut leaver = connect(out_addr).await;
    let mut stayer = connect(out_addr).await;
    sleep(Duration::from_millis(150)).await;

    sender
        .send(Message::Text("first".to_string()))
        .await
        .unwrap();
    assert_eq!(
        recv_message(&mut leaver).await,
        Message::Text("first".to_string())
    );
    assert_eq!(
        recv_message(&mut stayer).await,
        Message::Text("first".to_string())
    );

    // One target leaves; delivery to the rest must be unaffected
    leaver.close(None).await.unwrap();

    sender
        .send(Message::Text("second".to_string()))
        .await
        .unwrap();
    assert_eq!(
        recv_message(&mut stayer).await,
        Message::Text("second".to_string())
    );
}

#[tokio::test]
async fn test_non_root_path_is_rejected() {
    let (addr, _) = start_relay(0, 0).await;

    let result = connect_async(format!("ws://{}/elsewhere", addr)).await;
    assert!(result.is_err(), "upgrade off the root path must be refused");

    // The root path still works
    let mut ok = connect(addr).await;
    ok.close(None).await.unwrap();
}

#[tokio::test]
async fn test_target_inbound_messages_are_not_relayed() {
    let (in_addr, out_addr) = start_relay(free_port().await, free_port().await).await;
    let out_addr = out_addr.unwrap();

    let mut source = connect(in_addr).await;
    let mut talker = connect(out_addr).await;
    let mut listener = connect(out_addr).await;
    sleep(Duration::from_millis(150)).await;

    // Messages from target-group clients are dropped, not fanned out
    talker
        .send(Message::Text("backchannel".to_string()))
        .await
        .unwrap();

    assert_silent(&mut listener).await;
    assert_silent(&mut source).await;
}
