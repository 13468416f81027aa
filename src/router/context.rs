// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt::Display, sync::Arc};

use anyhow::{Result, bail};
use futures_util::future::BoxFuture;
use prost::Message;

use crate::{
    router::{Dispatcher, HandlerFunc},
    session::{Location, SessionError, SessionStorage},
    wire::{
        META_DEST_SERVER,
        frame::WireError,
        pkt::LogicPkt,
        proto::{ErrorResp, Header, Session, Status},
    },
};

/// Everything one handler invocation sees: the inbound packet, the caller's
/// session, the dispatcher for replies/pushes and the session storage.
pub struct Context {
    request: LogicPkt,
    session: Session,
    dispatcher: Arc<dyn Dispatcher>,
    storage: Arc<dyn SessionStorage>,
    handlers: Vec<HandlerFunc>,
    index: usize,
}

impl Context {
    pub(crate) fn new(
        request: LogicPkt,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
        session: Session,
        handlers: Vec<HandlerFunc>,
    ) -> Self {
        Self { request, session, dispatcher, storage, handlers, index: 0 }
    }

    pub fn header(&self) -> &Header {
        &self.request.header
    }

    pub fn request(&self) -> &LogicPkt {
        &self.request
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn read_body<M: Message + Default>(&self) -> Result<M, WireError> {
        self.request.read_body()
    }

    /// Runs the rest of the chain. Middleware awaits this to wrap the
    /// handlers behind it; plain handlers never call it.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            while self.index < self.handlers.len() {
                let handler = Arc::clone(&self.handlers[self.index]);
                self.index += 1;
                handler.as_ref()(self).await;
            }
        })
    }

    /// Replies to the originator: the response travels back to the gateway
    /// named in the request's `dest.server` meta, onto the calling channel.
    pub async fn resp<M: Message>(&self, status: Status, body: &M) -> Result<()> {
        let Some(gateway) = self.header().get_meta(META_DEST_SERVER) else {
            bail!("packet carries no reply gateway");
        };
        let mut packet = LogicPkt::from_header(self.header()).with_status(status);
        packet.write_body(body);
        let channel = self.header().channel_id.clone();
        self.dispatcher
            .push(&gateway.to_string_value(), vec![channel], &mut packet)
            .await
    }

    pub async fn resp_with_error(&self, status: Status, err: impl Display) -> Result<()> {
        self.resp(status, &ErrorResp { message: err.to_string() }).await
    }

    /// Replies with a bare status and no body.
    pub async fn resp_status(&self, status: Status) -> Result<()> {
        let Some(gateway) = self.header().get_meta(META_DEST_SERVER) else {
            bail!("packet carries no reply gateway");
        };
        let mut packet = LogicPkt::from_header(self.header()).with_status(status);
        let channel = self.header().channel_id.clone();
        self.dispatcher
            .push(&gateway.to_string_value(), vec![channel], &mut packet)
            .await
    }

    /// Sends a push carrying `body` to every location, one packet per
    /// gateway (channels on a common gateway share a packet).
    pub async fn dispatch<M: Message>(
        &self,
        body: &M,
        locations: &[Location],
    ) -> Result<()> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for loc in locations {
            match groups.iter_mut().find(|(gate, _)| *gate == loc.gate_id) {
                Some((_, channels)) => channels.push(loc.channel_id.clone()),
                None => groups
                    .push((loc.gate_id.clone(), vec![loc.channel_id.clone()])),
            }
        }
        for (gateway, channels) in groups {
            let mut packet = LogicPkt::from_header(self.header());
            packet.write_body(body);
            self.dispatcher.push(&gateway, channels, &mut packet).await?;
        }
        Ok(())
    }

    pub async fn get_location(
        &self,
        account: &str,
        device: &str,
    ) -> Result<Location, SessionError> {
        self.storage.get_location(account, device).await
    }

    pub async fn get_locations(
        &self,
        accounts: &[&str],
    ) -> Result<Vec<Location>, SessionError> {
        self.storage.get_locations(accounts).await
    }

    pub async fn add(&self, session: &Session) -> Result<(), SessionError> {
        self.storage.add(session).await
    }

    pub async fn delete(&self, account: &str, channel_id: &str) -> Result<(), SessionError> {
        self.storage.delete(account, channel_id).await
    }
}
