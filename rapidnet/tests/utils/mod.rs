#![allow(dead_code)]

use rapidnet::*;

use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::mpsc::Receiver,
    time::timeout,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn next_event(events: &mut Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert that nothing arrives on the event channel for a little while.
pub async fn assert_no_event(events: &mut Receiver<ConnectionEvent>) {
    if let Ok(event) = timeout(Duration::from_millis(300), events.recv()).await {
        panic!("unexpected event {:?}", event);
    }
}

pub async fn expect_connected(events: &mut Receiver<ConnectionEvent>) -> Connection {
    let event = next_event(events).await;
    assert_eq!(event.detail, ConnectionEventDetail::Connected, "{:?}", event);
    event.connection
}

pub async fn expect_disconnected(
    events: &mut Receiver<ConnectionEvent>,
    id: ConnectionId,
) -> ConnectionError {
    let event = next_event(events).await;
    assert_eq!(event.source, id);
    match event.detail {
        ConnectionEventDetail::Disconnected(e) => e,
        other => panic!("expected disconnect, got {:?}", other),
    }
}

pub async fn next_frame(frames: &mut Receiver<Frame>) -> Option<Frame> {
    timeout(WAIT, frames.recv())
        .await
        .expect("timed out waiting for frame")
}

pub async fn raw_peer(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("couldn't connect")
}

pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    let wire = encode_frame(payload, ByteOrder::BigEndian).unwrap();
    stream.write_all(&wire).await.unwrap();
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
