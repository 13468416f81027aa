// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use im_mesh_rs::{
    channel::{Channel, MessageListener, Meta, OUTBOUND_QUEUE},
    transport::{Conn, TcpConn},
    wire::frame::{self, Frame, OpCode},
    workers::WorkerPool,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

/// Collects payloads delivered by the read loop.
struct CollectListener {
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl MessageListener for CollectListener {
    async fn receive(&self, _agent: Arc<Channel>, payload: Bytes) {
        let _ = self.tx.send(payload);
    }
}

struct Harness {
    channel: Arc<Channel>,
    /// the client end of the TCP pair
    peer: TcpStream,
    received: mpsc::UnboundedReceiver<Bytes>,
    listener: Arc<CollectListener>,
}

async fn harness() -> Result<Harness> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (peer, accepted) = tokio::try_join!(TcpStream::connect(addr), async {
        Ok::<_, std::io::Error>(listener.accept().await?.0)
    })?;

    let conn = Conn::Tcp(TcpConn::new(accepted)?);
    let channel = Channel::new("ch1".to_string(), Meta::new(), conn, WorkerPool::new(16));

    let (tx, received) = mpsc::unbounded_channel();
    Ok(Harness { channel, peer, received, listener: Arc::new(CollectListener { tx }) })
}

#[tokio::test]
async fn test_outbound_queue_capacity() {
    assert_eq!(OUTBOUND_QUEUE, 5);
}

#[tokio::test]
async fn test_second_readloop_fails_fast() -> Result<()> {
    let h = harness().await?;

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    tokio::spawn(async move {
        let _ = ch.readloop(lst).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h
        .channel
        .readloop(Arc::clone(&h.listener) as _)
        .await
        .expect_err("second readloop must fail");
    assert_eq!(err.to_string(), "channel has started");
    Ok(())
}

#[tokio::test]
async fn test_push_before_start_fails() -> Result<()> {
    let h = harness().await?;
    let err = h.channel.push(Bytes::from_static(b"x")).await.expect_err("init state");
    assert!(err.to_string().contains("has closed"));
    Ok(())
}

#[tokio::test]
async fn test_payloads_reach_listener_in_order() -> Result<()> {
    let mut h = harness().await?;

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    tokio::spawn(async move {
        let _ = ch.readloop(lst).await;
    });

    for msg in [b"one".as_ref(), b"two".as_ref()] {
        frame::write_frame(&mut h.peer, OpCode::Binary, msg).await?;
    }

    let first = timeout(Duration::from_secs(1), h.received.recv()).await?;
    let second = timeout(Duration::from_secs(1), h.received.recv()).await?;
    assert_eq!(first.as_deref(), Some(b"one".as_ref()));
    assert_eq!(second.as_deref(), Some(b"two".as_ref()));
    Ok(())
}

#[tokio::test]
async fn test_ping_answered_with_pong_without_delivery() -> Result<()> {
    let mut h = harness().await?;

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    tokio::spawn(async move {
        let _ = ch.readloop(lst).await;
    });

    frame::write_frame(&mut h.peer, OpCode::Ping, &[]).await?;

    let frame = timeout(Duration::from_secs(1), frame::read_frame(&mut h.peer)).await??;
    assert_eq!(frame.opcode, OpCode::Pong);

    // nothing was handed to the listener
    assert!(
        timeout(Duration::from_millis(100), h.received.recv())
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn test_close_drains_then_rejects_push() -> Result<()> {
    let mut h = harness().await?;

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    tokio::spawn(async move {
        let _ = ch.readloop(lst).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    for msg in [b"a".as_ref(), b"b".as_ref(), b"c".as_ref()] {
        h.channel.push(Bytes::copy_from_slice(msg)).await?;
    }
    h.channel.close()?;

    // everything enqueued before close still reaches the wire, in order
    let mut got = Vec::new();
    for _ in 0..3 {
        let frame: Frame =
            timeout(Duration::from_secs(1), frame::read_frame(&mut h.peer)).await??;
        assert_eq!(frame.opcode, OpCode::Binary);
        got.push(frame.payload);
    }
    assert_eq!(got, [b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);

    let err = h.channel.push(Bytes::from_static(b"late")).await.expect_err("closed");
    assert!(err.to_string().contains("has closed"));

    // close is exactly-once
    let err = h.channel.close().expect_err("second close");
    assert_eq!(err.to_string(), "channel state not started");
    Ok(())
}

#[tokio::test]
async fn test_remote_close_ends_readloop() -> Result<()> {
    let mut h = harness().await?;

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    let loop_task = tokio::spawn(async move { ch.readloop(lst).await });

    frame::write_frame(&mut h.peer, OpCode::Close, &[]).await?;

    let outcome = timeout(Duration::from_secs(1), loop_task).await??;
    let err = outcome.expect_err("close frame ends the loop");
    assert_eq!(err.to_string(), "remote side close the channel");
    Ok(())
}

#[tokio::test]
async fn test_read_deadline_ends_readloop() -> Result<()> {
    let h = harness().await?;
    h.channel.set_readwait(Duration::from_millis(100));

    let ch = Arc::clone(&h.channel);
    let lst = Arc::clone(&h.listener) as Arc<dyn MessageListener>;
    let outcome = timeout(Duration::from_secs(2), async move {
        ch.readloop(lst).await
    })
    .await?;

    let err = outcome.expect_err("silence must time the channel out");
    assert!(err.to_string().contains("read timeout"));
    Ok(())
}
