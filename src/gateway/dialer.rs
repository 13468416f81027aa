// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::{net::TcpStream, time::timeout};

use crate::{
    client::{Dialer, DialerContext},
    wire::{
        frame::{self, OpCode},
        proto::{InnerHandshakeReq, encode_message},
    },
};

/// Dials a peer service and introduces this node by service id, so the peer
/// registers the link as a channel under that id.
pub struct TcpDialer {
    service_id: String,
}

impl TcpDialer {
    pub fn new(service_id: &str) -> Self {
        Self { service_id: service_id.to_string() }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<TcpStream> {
        let mut stream = timeout(ctx.timeout, TcpStream::connect(&ctx.address))
            .await
            .map_err(|_| anyhow!("dial {} timed out", ctx.address))??;

        let req = InnerHandshakeReq { service_id: self.service_id.clone() };
        frame::write_frame(&mut stream, OpCode::Binary, &encode_message(&req)).await?;

        Ok(stream)
    }
}
