// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::{Result, anyhow, bail, ensure};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use prost::Message as _;
use tokio::time::timeout;
use tracing::{error, info};

use crate::{
    channel::{Channel, MessageListener, Meta},
    mesh::Container,
    router::{Dispatcher, Router},
    server::{Acceptor, StateListener},
    session::{SessionError, SessionStorage},
    transport::Conn,
    wire::{
        COMMAND_LOGIN_SIGNIN, META_DEST_CHANNELS, META_DEST_SERVER,
        pkt::{LogicPkt, MetaValue, must_read_logic_pkt},
        proto::{ErrorResp, InnerHandshakeReq, Session, Status},
    },
};

/// Routes finished packets through the container toward the gateway channel
/// they belong on.
pub struct ServerDispatcher {
    container: OnceCell<Weak<Container>>,
}

impl ServerDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { container: OnceCell::new() })
    }

    pub fn bind_container(&self, container: Weak<Container>) {
        let _ = self.container.set(container);
    }

    fn container(&self) -> Result<Arc<Container>> {
        self.container
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow!("dispatcher is not bound to a container"))
    }
}

impl Default for ServerDispatcher {
    fn default() -> Self {
        Self { container: OnceCell::new() }
    }
}

#[async_trait]
impl Dispatcher for ServerDispatcher {
    async fn push(
        &self,
        gateway: &str,
        channels: Vec<String>,
        packet: &mut LogicPkt,
    ) -> Result<()> {
        packet
            .header
            .add_string_meta(META_DEST_CHANNELS, &channels.join(","));
        self.container()?.push(gateway, packet).await
    }
}

/// The logic server's edge: gateways appear as channels named after their
/// service id, established through the inner handshake.
pub struct ServHandler {
    router: Arc<Router>,
    storage: Arc<dyn SessionStorage>,
    dispatcher: Arc<ServerDispatcher>,
}

impl ServHandler {
    pub fn new(
        router: Arc<Router>,
        storage: Arc<dyn SessionStorage>,
        dispatcher: Arc<ServerDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self { router, storage, dispatcher })
    }

    /// Short-circuit response used before the router gets involved.
    async fn reply_error(
        &self,
        request: &LogicPkt,
        status: Status,
        message: &str,
    ) -> Result<()> {
        let Some(MetaValue::String(gateway)) =
            request.header.get_meta(META_DEST_SERVER)
        else {
            bail!("packet carries no reply gateway");
        };
        let mut resp = LogicPkt::from_header(&request.header).with_status(status);
        resp.write_body(&ErrorResp { message: message.to_string() });
        self.dispatcher
            .push(&gateway, vec![request.header.channel_id.clone()], &mut resp)
            .await
    }
}

#[async_trait]
impl Acceptor for ServHandler {
    /// Inner handshake: the first frame names the dialing service; that name
    /// becomes the channel id the dispatcher pushes responses onto.
    async fn accept(
        &self,
        conn: &mut Conn,
        handshake_timeout: Duration,
    ) -> Result<(String, Meta)> {
        let frame = timeout(handshake_timeout, conn.read_frame()).await??;
        let req = InnerHandshakeReq::decode(&frame.payload[..])?;
        ensure!(!req.service_id.is_empty(), "empty service id in inner handshake");
        info!(service_id = %req.service_id, "inner peer connected");
        Ok((req.service_id, Meta::new()))
    }
}

#[async_trait]
impl MessageListener for ServHandler {
    /// Decodes one logic packet, resolves the caller's session and serves it
    /// through the router. A missing session answers `SessionLost`.
    async fn receive(&self, agent: Arc<Channel>, payload: Bytes) {
        let mut buf = payload;
        let packet = match must_read_logic_pkt(&mut buf) {
            Ok(p) => p,
            Err(e) => {
                error!(channel_id = %agent.id(), "read packet error: {e}");
                return;
            },
        };

        let session = if packet.header.command == COMMAND_LOGIN_SIGNIN {
            match packet.read_body::<Session>() {
                Ok(s) => s,
                Err(e) => {
                    error!("signin packet body: {e}");
                    let _ = self
                        .reply_error(
                            &packet,
                            Status::InvalidPacketBody,
                            "InvalidPacketBody",
                        )
                        .await;
                    return;
                },
            }
        } else {
            match self.storage.get(&packet.header.channel_id).await {
                Ok(s) => s,
                Err(SessionError::SessionNil) => {
                    if let Err(e) = self
                        .reply_error(&packet, Status::SessionLost, "SessionLost")
                        .await
                    {
                        error!("session-lost reply failed: {e}");
                    }
                    return;
                },
                Err(e) => {
                    error!(channel_id = %packet.header.channel_id, "session load: {e}");
                    return;
                },
            }
        };

        if let Err(e) = self
            .router
            .serve(
                packet,
                Arc::clone(&self.dispatcher) as _,
                Arc::clone(&self.storage),
                session,
            )
            .await
        {
            error!("serve error: {e}");
        }
    }
}

#[async_trait]
impl StateListener for ServHandler {
    /// A gateway link dropped. Its sessions stay: the accounts are still
    /// logged in from the gateway's perspective and the link will be redialed.
    async fn disconnect(&self, channel_id: &str) -> Result<()> {
        info!(channel_id = %channel_id, "inner peer disconnected");
        Ok(())
    }
}
