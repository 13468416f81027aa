// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection objects for the two client-facing protocols. A [`Conn`] is the
//! unsplit handle used during the login handshake; once a channel is built it
//! is split into a reader half (owned by the read loop) and a writer half
//! (owned by the write loop).

use std::net::SocketAddr;

use anyhow::Result;

use crate::wire::frame::{Frame, OpCode};

pub mod tcp;
pub mod ws;

pub use tcp::TcpConn;
pub use ws::WsConn;

#[derive(Debug)]
pub enum Conn {
    Tcp(TcpConn),
    Ws(WsConn),
}

impl Conn {
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self {
            Conn::Tcp(c) => c.read_frame().await,
            Conn::Ws(c) => c.read_frame().await,
        }
    }

    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        match self {
            Conn::Tcp(c) => c.write_frame(opcode, payload).await,
            Conn::Ws(c) => c.write_frame(opcode, payload).await,
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Conn::Tcp(c) => c.flush().await,
            Conn::Ws(c) => c.flush().await,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        match self {
            Conn::Tcp(c) => c.peer_addr(),
            Conn::Ws(c) => c.peer_addr(),
        }
    }

    pub fn split(self) -> (ConnReader, ConnWriter) {
        match self {
            Conn::Tcp(c) => {
                let (rd, wr) = c.split();
                (ConnReader::Tcp(rd), ConnWriter::Tcp(wr))
            },
            Conn::Ws(c) => {
                let (rd, wr) = c.split();
                (ConnReader::Ws(rd), ConnWriter::Ws(wr))
            },
        }
    }
}

/// The read half of a split connection. Sole property of the read loop.
#[derive(Debug)]
pub enum ConnReader {
    Tcp(tcp::TcpReader),
    Ws(ws::WsReader),
}

impl ConnReader {
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self {
            ConnReader::Tcp(r) => r.read_frame().await,
            ConnReader::Ws(r) => r.read_frame().await,
        }
    }
}

/// The write half of a split connection. Sole property of the write loop.
#[derive(Debug)]
pub enum ConnWriter {
    Tcp(tcp::TcpWriter),
    Ws(ws::WsWriter),
}

impl ConnWriter {
    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        match self {
            ConnWriter::Tcp(w) => w.write_frame(opcode, payload).await,
            ConnWriter::Ws(w) => w.write_frame(opcode, payload).await,
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        match self {
            ConnWriter::Tcp(w) => w.flush().await,
            ConnWriter::Ws(w) => w.flush().await,
        }
    }
}
