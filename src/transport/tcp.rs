// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use anyhow::Result;
use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::wire::frame::{self, Frame, OpCode};

const READ_BUFFER: usize = 4096;
const WRITE_BUFFER: usize = 1024;

/// A raw TCP connection speaking the `opcode || u32 len || payload` framing.
#[derive(Debug)]
pub struct TcpConn {
    rd: BufReader<OwnedReadHalf>,
    wr: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        Ok(Self {
            rd: BufReader::with_capacity(READ_BUFFER, r),
            wr: BufWriter::with_capacity(WRITE_BUFFER, w),
            peer,
        })
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        Ok(frame::read_frame(&mut self.rd).await?)
    }

    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        Ok(frame::write_frame(&mut self.wr, opcode, payload).await?)
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.wr.flush().await?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn split(self) -> (TcpReader, TcpWriter) {
        (TcpReader { rd: self.rd }, TcpWriter { wr: self.wr })
    }
}

#[derive(Debug)]
pub struct TcpReader {
    rd: BufReader<OwnedReadHalf>,
}

impl TcpReader {
    pub async fn read_frame(&mut self) -> Result<Frame> {
        Ok(frame::read_frame(&mut self.rd).await?)
    }
}

#[derive(Debug)]
pub struct TcpWriter {
    wr: BufWriter<OwnedWriteHalf>,
}

impl TcpWriter {
    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        Ok(frame::write_frame(&mut self.wr, opcode, payload).await?)
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.wr.flush().await?)
    }
}
