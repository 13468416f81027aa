// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The TCP transport frame: `u8 opcode || u32 length || payload`. Opcode
//! numbering follows RFC 6455 so the same `Frame` value models both the raw
//! TCP framing and WebSocket messages.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("invalid utf-8 in wire string")]
    InvalidUtf8,
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
    #[error("incorrect magic code: {0:02x?}")]
    IncorrectMagic([u8; 4]),
    #[error("it is not a logic packet")]
    NotLogicPkt,
    #[error("it is not a basic packet")]
    NotBasicPkt,
    #[error("protobuf decode: {0}")]
    Proto(#[from] prost::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl TryFrom<u8> for OpCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xa => Ok(OpCode::Pong),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self { opcode, payload: payload.into() }
    }
}

/// Reads one frame from a (buffered) byte stream.
pub async fn read_frame<R>(r: &mut R) -> Result<Frame, WireError>
where R: AsyncRead + Unpin {
    let opcode = OpCode::try_from(r.read_u8().await?)?;
    let len = r.read_u32().await? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(Frame { opcode, payload: Bytes::from(payload) })
}

/// Writes one frame. The caller owns flushing, so bursts of frames can share
/// a single flush.
pub async fn write_frame<W>(
    w: &mut W,
    opcode: OpCode,
    payload: &[u8],
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    w.write_u8(opcode as u8).await?;
    w.write_u32(payload.len() as u32).await?;
    if !payload.is_empty() {
        w.write_all(payload).await?;
    }
    Ok(())
}
