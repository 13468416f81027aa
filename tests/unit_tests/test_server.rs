// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use im_mesh_rs::{
    channel::{Channel, MessageListener, Meta},
    naming::ServiceEntry,
    server::{Acceptor, Server, ServerOptions, StateListener},
    transport::Conn,
    wire::{
        Protocol,
        frame::{self, OpCode},
    },
};
use serial_test::serial;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{sleep, timeout},
};

/// Accepts every connection under a fixed channel id.
struct FixedAcceptor {
    id: String,
}

#[async_trait]
impl Acceptor for FixedAcceptor {
    async fn accept(&self, _conn: &mut Conn, _t: Duration) -> Result<(String, Meta)> {
        Ok((self.id.clone(), Meta::new()))
    }
}

struct EchoListener;

#[async_trait]
impl MessageListener for EchoListener {
    async fn receive(&self, agent: Arc<Channel>, payload: Bytes) {
        let _ = agent.push(payload).await;
    }
}

struct DisconnectSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl StateListener for DisconnectSink {
    async fn disconnect(&self, channel_id: &str) -> Result<()> {
        let _ = self.tx.send(channel_id.to_string());
        Ok(())
    }
}

fn test_server(listen: &str, acceptor: Arc<dyn Acceptor>) -> (Arc<Server>, mpsc::UnboundedReceiver<String>) {
    let entry = ServiceEntry::new("srv1", "test", Protocol::Tcp, "127.0.0.1", 0);
    let server = Server::new(listen, entry, ServerOptions::default());
    let (tx, rx) = mpsc::unbounded_channel();
    server.set_acceptor(acceptor);
    server.set_message_listener(Arc::new(EchoListener));
    server.set_state_listener(Arc::new(DisconnectSink { tx }));
    (server, rx)
}

#[tokio::test]
#[serial]
async fn test_echo_through_channel() -> Result<()> {
    let (server, _rx) =
        test_server("127.0.0.1:19311", Arc::new(FixedAcceptor { id: "c1".into() }));
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = srv.start().await;
    });
    sleep(Duration::from_millis(100)).await;

    let mut peer = TcpStream::connect("127.0.0.1:19311").await?;
    frame::write_frame(&mut peer, OpCode::Binary, b"ping me back").await?;

    let got = timeout(Duration::from_secs(1), frame::read_frame(&mut peer)).await??;
    assert_eq!(got.opcode, OpCode::Binary);
    assert_eq!(&got.payload[..], b"ping me back");

    server.shutdown();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_duplicate_channel_id_is_refused() -> Result<()> {
    let (server, _rx) =
        test_server("127.0.0.1:19312", Arc::new(FixedAcceptor { id: "dup".into() }));
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = srv.start().await;
    });
    sleep(Duration::from_millis(100)).await;

    let _first = TcpStream::connect("127.0.0.1:19312").await?;
    sleep(Duration::from_millis(100)).await;

    let mut second = TcpStream::connect("127.0.0.1:19312").await?;
    let got = timeout(Duration::from_secs(1), frame::read_frame(&mut second)).await??;
    assert_eq!(got.opcode, OpCode::Close);
    assert_eq!(&got.payload[..], b"channelId is repeated");

    server.shutdown();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_push_to_missing_channel_fails() -> Result<()> {
    let (server, _rx) =
        test_server("127.0.0.1:19313", Arc::new(FixedAcceptor { id: "c1".into() }));
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = srv.start().await;
    });
    sleep(Duration::from_millis(100)).await;

    let err = server
        .push("ghost", Bytes::from_static(b"x"))
        .await
        .expect_err("no such channel");
    assert_eq!(err.to_string(), "channel not found: ghost");

    server.shutdown();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_disconnect_listener_fires_on_peer_close() -> Result<()> {
    let (server, mut rx) =
        test_server("127.0.0.1:19314", Arc::new(FixedAcceptor { id: "c9".into() }));
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = srv.start().await;
    });
    sleep(Duration::from_millis(100)).await;

    let mut peer = TcpStream::connect("127.0.0.1:19314").await?;
    sleep(Duration::from_millis(100)).await;
    frame::write_frame(&mut peer, OpCode::Close, &[]).await?;

    let gone = timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(gone.as_deref(), Some("c9"));

    server.shutdown();
    Ok(())
}
