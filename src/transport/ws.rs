// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use anyhow::{Result, bail};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{
        Message, Utf8Bytes,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::wire::frame::{Frame, OpCode};

/// A server-side WebSocket connection (RFC 6455 framing via tungstenite),
/// exposing the same opcode/payload frame view as the TCP transport.
#[derive(Debug)]
pub struct WsConn {
    inner: WebSocketStream<TcpStream>,
    peer: SocketAddr,
}

impl WsConn {
    /// Performs the HTTP upgrade handshake on a fresh TCP connection.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let inner = accept_async(stream).await?;
        Ok(Self { inner, peer })
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.inner.next().await {
            Some(msg) => message_to_frame(msg?),
            None => bail!("websocket stream closed"),
        }
    }

    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.inner.feed(frame_to_message(opcode, payload)?).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = self.inner.split();
        (WsReader { inner: stream }, WsWriter { inner: sink })
    }
}

#[derive(Debug)]
pub struct WsReader {
    inner: SplitStream<WebSocketStream<TcpStream>>,
}

impl WsReader {
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.inner.next().await {
            Some(msg) => message_to_frame(msg?),
            None => bail!("websocket stream closed"),
        }
    }
}

#[derive(Debug)]
pub struct WsWriter {
    inner: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl WsWriter {
    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.inner.feed(frame_to_message(opcode, payload)?).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }
}

fn message_to_frame(msg: Message) -> Result<Frame> {
    Ok(match msg {
        Message::Binary(data) => Frame::new(OpCode::Binary, data),
        Message::Text(text) => {
            Frame::new(OpCode::Text, Bytes::copy_from_slice(text.as_bytes()))
        },
        Message::Ping(data) => Frame::new(OpCode::Ping, data),
        Message::Pong(data) => Frame::new(OpCode::Pong, data),
        Message::Close(reason) => {
            let payload = reason
                .map(|cf| Bytes::copy_from_slice(cf.reason.as_bytes()))
                .unwrap_or_default();
            Frame::new(OpCode::Close, payload)
        },
        Message::Frame(_) => bail!("unexpected raw websocket frame"),
    })
}

fn frame_to_message(opcode: OpCode, payload: &[u8]) -> Result<Message> {
    Ok(match opcode {
        OpCode::Binary | OpCode::Continuation => {
            Message::Binary(Bytes::copy_from_slice(payload))
        },
        OpCode::Text => Message::text(String::from_utf8(payload.to_vec())?),
        OpCode::Ping => Message::Ping(Bytes::copy_from_slice(payload)),
        OpCode::Pong => Message::Pong(Bytes::copy_from_slice(payload)),
        OpCode::Close => Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from(String::from_utf8_lossy(payload).into_owned()),
        })),
    })
}
