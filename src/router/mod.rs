// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command router for the logic tier: a middleware chain in front of a
//! command → handler-chain map, gin-style (`ctx.next().await` advances the
//! chain, so middleware can wrap everything behind it).

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::{
    session::SessionStorage,
    wire::{
        pkt::LogicPkt,
        proto::{ErrorResp, Session, Status},
    },
};

pub mod context;
pub mod middleware;

pub use context::Context;

/// One element of a handler chain.
pub type HandlerFunc =
    Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync>;

/// Helper pinning the higher-ranked lifetime for closure-based handlers.
pub fn handler_fn<F>(f: F) -> HandlerFunc
where F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static {
    Arc::new(f)
}

/// Sends a finished packet toward the gateway hosting its target channels.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn push(
        &self,
        gateway: &str,
        channels: Vec<String>,
        packet: &mut LogicPkt,
    ) -> Result<()>;
}

#[derive(Default)]
pub struct Router {
    middleware: Vec<HandlerFunc>,
    handlers: HashMap<String, Vec<HandlerFunc>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends global middleware. Only affects commands registered after
    /// this call: `handle` snapshots the middleware prefix.
    pub fn use_middleware(&mut self, handler: HandlerFunc) {
        self.middleware.push(handler);
    }

    /// Registers a handler under a command. The first registration prefixes
    /// the current middleware chain; repeated registrations append.
    pub fn handle(&mut self, command: &str, handler: HandlerFunc) {
        let chain = self
            .handlers
            .entry(command.to_string())
            .or_insert_with(|| self.middleware.clone());
        chain.push(handler);
    }

    /// Runs the chain registered for the packet's command, or answers
    /// `NotImplemented` when there is none.
    pub async fn serve(
        &self,
        request: LogicPkt,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
        session: Session,
    ) -> Result<()> {
        let chain = self
            .handlers
            .get(&request.header.command)
            .cloned()
            .unwrap_or_else(|| vec![not_implemented()]);

        let mut ctx = Context::new(request, dispatcher, storage, session, chain);
        ctx.next().await;
        Ok(())
    }
}

fn not_implemented() -> HandlerFunc {
    handler_fn(|ctx: &mut Context| {
        Box::pin(async move {
            let _ = ctx
                .resp(
                    Status::NotImplemented,
                    &ErrorResp { message: "NotImplemented".to_string() },
                )
                .await;
        })
    })
}
