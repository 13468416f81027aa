// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::{Arc, Weak}, time::Duration};

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use once_cell::sync::OnceCell;
use tokio::time::timeout;
use tracing::{error, info};

use crate::{
    channel::{Channel, MessageListener, Meta},
    mesh::Container,
    metrics::{MESSAGE_IN_FLOW_BYTES, MESSAGE_IN_TOTAL},
    server::{Acceptor, StateListener},
    token,
    transport::Conn,
    wire::{
        COMMAND_LOGIN_SIGNIN, COMMAND_LOGIN_SIGNOUT, META_KEY_ACCOUNT, META_KEY_APP,
        SEQ, SN_LOGIN,
        frame::OpCode,
        pkt::{BasicPkt, CODE_PING, CODE_PONG, LogicPkt, Packet, must_read_logic_pkt},
        proto::{ErrorResp, LoginReq, Session, Status},
    },
};

/// The gateway's edge logic: login handshake on accept, packet tagging and
/// mesh forwarding on receive, signout on disconnect.
pub struct Handler {
    service_id: String,
    app_secret: String,
    container: OnceCell<Weak<Container>>,
}

impl Handler {
    pub fn new(service_id: &str, app_secret: &str) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.to_string(),
            app_secret: app_secret.to_string(),
            container: OnceCell::new(),
        })
    }

    /// Must be called once after the container owning this handler exists.
    pub fn bind_container(&self, container: Weak<Container>) {
        let _ = self.container.set(container);
    }

    fn container(&self) -> Result<Arc<Container>> {
        self.container
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow!("handler is not bound to a container"))
    }

    fn generate_channel_id(&self, account: &str) -> String {
        format!("{}_{}_{}", self.service_id, account, SEQ.next())
    }
}

#[async_trait]
impl Acceptor for Handler {
    /// The login flow: within the login deadline the very first frame must
    /// be a `login.signin` packet with a valid token. On success the packet
    /// is rewritten into a `Session` and forwarded to the login service.
    async fn accept(
        &self,
        conn: &mut Conn,
        login_timeout: Duration,
    ) -> Result<(String, Meta)> {
        let frame = timeout(login_timeout, conn.read_frame())
            .await
            .context("login handshake timed out")??;

        let mut buf = frame.payload;
        let mut req = must_read_logic_pkt(&mut buf)?;

        if req.header.command != COMMAND_LOGIN_SIGNIN {
            let resp =
                LogicPkt::from_header(&req.header).with_status(Status::InvalidCommand);
            conn.write_frame(OpCode::Binary, &resp.marshal()).await?;
            conn.flush().await?;
            bail!("must be a SignIn command");
        }

        let login: LoginReq = req.read_body()?;
        let secret = if self.app_secret.is_empty() {
            token::DEFAULT_SECRET
        } else {
            &self.app_secret
        };
        let tk = match token::parse(secret, &login.token) {
            Ok(tk) => tk,
            Err(e) => {
                let resp = LogicPkt::from_header(&req.header)
                    .with_status(Status::Unauthorized);
                conn.write_frame(OpCode::Binary, &resp.marshal()).await?;
                conn.flush().await?;
                return Err(e.into());
            },
        };

        let id = self.generate_channel_id(&tk.account);
        info!(account = %tk.account, app = %tk.app, channel_id = %id, "accept channel");

        req.header.channel_id = id.clone();
        req.write_body(&Session {
            account: tk.account.clone(),
            channel_id: id.clone(),
            gate_id: self.service_id.clone(),
            app: tk.app.clone(),
            remote_ip: conn.peer_addr().ip().to_string(),
            ..Default::default()
        });
        req.header.add_string_meta(META_KEY_APP, &tk.app);
        req.header.add_string_meta(META_KEY_ACCOUNT, &tk.account);

        self.container()?.forward(SN_LOGIN, &mut req).await?;

        let mut meta = Meta::new();
        meta.insert(META_KEY_APP.to_string(), tk.app);
        meta.insert(META_KEY_ACCOUNT.to_string(), tk.account);
        Ok((id, meta))
    }
}

#[async_trait]
impl MessageListener for Handler {
    /// Per payload from a client channel: answer link pings locally, stamp
    /// and forward everything else toward the command's service.
    async fn receive(&self, agent: Arc<Channel>, payload: Bytes) {
        let mut buf = payload.clone();
        let packet = match Packet::read(&mut buf) {
            Ok(p) => p,
            Err(e) => {
                error!(channel_id = %agent.id(), "read packet error: {e}");
                return;
            },
        };

        match packet {
            Packet::Basic(basic) => {
                if basic.code == CODE_PING {
                    let _ = agent.push(BasicPkt::new(CODE_PONG).marshal()).await;
                }
            },
            Packet::Logic(mut logic) => {
                logic.header.channel_id = agent.id().to_string();

                counter!(
                    MESSAGE_IN_TOTAL,
                    "service_id" => self.service_id.clone(),
                    "command" => logic.header.command.clone()
                )
                .increment(1);
                counter!(
                    MESSAGE_IN_FLOW_BYTES,
                    "service_id" => self.service_id.clone(),
                    "command" => logic.header.command.clone()
                )
                .increment(payload.len() as u64);

                if let Some(app) = agent.meta().get(META_KEY_APP) {
                    logic.header.add_string_meta(META_KEY_APP, app);
                }
                if let Some(account) = agent.meta().get(META_KEY_ACCOUNT) {
                    logic.header.add_string_meta(META_KEY_ACCOUNT, account);
                }

                let service = logic.header.service_name().to_string();
                let forwarded = match self.container() {
                    Ok(container) => container.forward(&service, &mut logic).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = forwarded {
                    error!(
                        channel_id = %agent.id(),
                        command = %logic.header.command,
                        dest = %logic.header.dest,
                        "forward error: {e}"
                    );
                    // mesh trouble is never fatal here, the caller learns
                    // about it through a status packet
                    let mut resp = LogicPkt::from_header(&logic.header)
                        .with_status(Status::SystemException);
                    resp.write_body(&ErrorResp { message: e.to_string() });
                    let _ = agent.push(resp.marshal()).await;
                }
            },
        }
    }
}

#[async_trait]
impl StateListener for Handler {
    /// A channel died: tell the login service so the session is removed.
    async fn disconnect(&self, channel_id: &str) -> Result<()> {
        info!(channel_id = %channel_id, "disconnect");
        let mut logout = LogicPkt::new(COMMAND_LOGIN_SIGNOUT).with_channel(channel_id);
        self.container()?.forward(SN_LOGIN, &mut logout).await
    }
}
