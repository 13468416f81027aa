// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The accepting side of a node: listens, upgrades, runs the login handshake
//! through a pluggable [`Acceptor`], and owns the channel registry. Both
//! gateways and logic servers are a `Server`; only the plugged listeners
//! differ.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use metrics::gauge;
use once_cell::sync::OnceCell;
use rand::Rng;
use thiserror::Error;
use tokio::{net::TcpListener, sync::Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    channel::{Channel, ChannelMap, MessageListener, Meta},
    metrics::CHANNEL_TOTAL,
    naming::ServiceEntry,
    transport::{Conn, TcpConn, WsConn},
    wire::{
        DEFAULT_LOGINWAIT, DEFAULT_READWAIT, DEFAULT_WRITEWAIT, Protocol,
        frame::OpCode,
    },
    workers::WorkerPool,
};

pub const DEFAULT_MESSAGE_GPOOL: usize = 5000;
pub const DEFAULT_CONNECTION_GPOOL: usize = 5000;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("StateListener is required")]
    MissingStateListener,
    #[error("MessageListener is required")]
    MissingMessageListener,
}

/// Protocol-specific handshake: returns the channel id plus meta to attach,
/// or an error relayed to the peer as a Close frame.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self, conn: &mut Conn, timeout: Duration) -> Result<(String, Meta)>;
}

/// Invoked after a channel's read loop has exited and it was deregistered.
#[async_trait]
pub trait StateListener: Send + Sync {
    async fn disconnect(&self, channel_id: &str) -> Result<()>;
}

/// Fallback acceptor: no handshake, random channel id.
pub struct DefaultAcceptor;

#[async_trait]
impl Acceptor for DefaultAcceptor {
    async fn accept(
        &self,
        _conn: &mut Conn,
        _timeout: Duration,
    ) -> Result<(String, Meta)> {
        let mut raw = [0u8; 16];
        rand::rng().fill_bytes(&mut raw);
        Ok((hex::encode(raw), Meta::new()))
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub loginwait: Duration,
    pub readwait: Duration,
    pub writewait: Duration,
    pub message_gpool: usize,
    pub connection_gpool: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            loginwait: DEFAULT_LOGINWAIT,
            readwait: DEFAULT_READWAIT,
            writewait: DEFAULT_WRITEWAIT,
            message_gpool: DEFAULT_MESSAGE_GPOOL,
            connection_gpool: DEFAULT_CONNECTION_GPOOL,
        }
    }
}

pub struct Server {
    listen: String,
    entry: ServiceEntry,
    options: ServerOptions,
    channels: ChannelMap,
    acceptor: OnceCell<Arc<dyn Acceptor>>,
    message_listener: OnceCell<Arc<dyn MessageListener>>,
    state_listener: OnceCell<Arc<dyn StateListener>>,
    quit: CancellationToken,
    shutdown_done: AtomicBool,
}

impl Server {
    pub fn new(listen: &str, entry: ServiceEntry, options: ServerOptions) -> Arc<Self> {
        Arc::new(Self {
            listen: listen.to_string(),
            entry,
            options,
            channels: ChannelMap::new(),
            acceptor: OnceCell::new(),
            message_listener: OnceCell::new(),
            state_listener: OnceCell::new(),
            quit: CancellationToken::new(),
            shutdown_done: AtomicBool::new(false),
        })
    }

    pub fn set_acceptor(&self, acceptor: Arc<dyn Acceptor>) {
        let _ = self.acceptor.set(acceptor);
    }

    pub fn set_message_listener(&self, listener: Arc<dyn MessageListener>) {
        let _ = self.message_listener.set(listener);
    }

    pub fn set_state_listener(&self, listener: Arc<dyn StateListener>) {
        let _ = self.state_listener.set(listener);
    }

    pub fn entry(&self) -> &ServiceEntry {
        &self.entry
    }

    pub fn service_id(&self) -> &str {
        &self.entry.id
    }

    pub fn service_name(&self) -> &str {
        &self.entry.name
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    /// Validates the plugged listeners and binds the listen address. Split
    /// from [`Server::serve`] so a bind failure surfaces before the accept
    /// loop is detached.
    pub async fn bind(&self) -> Result<TcpListener> {
        if self.message_listener.get().is_none() {
            return Err(ServerError::MissingMessageListener.into());
        }
        if self.state_listener.get().is_none() {
            return Err(ServerError::MissingStateListener.into());
        }
        Ok(TcpListener::bind(&self.listen).await?)
    }

    /// Binds and serves until shutdown.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let lst = self.bind().await?;
        self.serve(lst).await
    }

    /// Serves connections until shutdown. Each accepted connection runs its
    /// handshake and read loop on its own task; concurrent connections are
    /// bounded by `connection_gpool`.
    pub async fn serve(self: &Arc<Self>, lst: TcpListener) -> Result<()> {
        let acceptor = self
            .acceptor
            .get_or_init(|| Arc::new(DefaultAcceptor))
            .clone();
        let mgpool = WorkerPool::new(self.options.message_gpool);
        let conn_permits = Arc::new(Semaphore::new(self.options.connection_gpool));

        info!(listen = %self.listen, id = %self.entry.id, "server started");

        loop {
            let (stream, _) = tokio::select! {
                _ = self.quit.cancelled() => break,
                res = lst.accept() => match res {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept error: {e}");
                        continue;
                    },
                },
            };

            let Ok(permit) = Arc::clone(&conn_permits).acquire_owned().await else {
                break;
            };
            let srv = Arc::clone(self);
            let pool = mgpool.clone();
            let acceptor = Arc::clone(&acceptor);
            tokio::spawn(async move {
                srv.conn_handler(stream, acceptor, pool).await;
                drop(permit);
            });
        }

        mgpool.close();
        info!(listen = %self.listen, "server accept loop quit");
        Ok(())
    }

    async fn conn_handler(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        acceptor: Arc<dyn Acceptor>,
        pool: WorkerPool,
    ) {
        let upgraded = match self.entry.protocol {
            Protocol::Tcp => TcpConn::new(stream).map(Conn::Tcp),
            Protocol::Ws => WsConn::accept(stream).await.map(Conn::Ws),
        };
        let mut conn = match upgraded {
            Ok(c) => c,
            Err(e) => {
                error!("upgrade error: {e}");
                return;
            },
        };
        let remote = conn.peer_addr();

        let (id, meta) = match acceptor.accept(&mut conn, self.options.loginwait).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = conn
                    .write_frame(OpCode::Close, e.to_string().as_bytes())
                    .await;
                let _ = conn.flush().await;
                return;
            },
        };
        if self.channels.contains(&id) {
            let _ = conn
                .write_frame(OpCode::Close, b"channelId is repeated")
                .await;
            let _ = conn.flush().await;
            return;
        }

        let channel = Channel::new(id.clone(), meta, conn, pool);
        channel.set_readwait(self.options.readwait);
        channel.set_writewait(self.options.writewait);
        self.channels.add(Arc::clone(&channel));

        let gauge = gauge!(
            CHANNEL_TOTAL,
            "service_id" => self.entry.id.clone(),
            "service_name" => self.entry.name.clone()
        );
        gauge.increment(1.0);

        info!(channel_id = %id, remote = %remote, "accept channel");

        if let Some(listener) = self.message_listener.get()
            && let Err(e) = channel.readloop(Arc::clone(listener)).await
        {
            debug!(channel_id = %id, "readloop ended: {e}");
        }

        self.channels.remove(&id);
        if let Some(state) = self.state_listener.get()
            && let Err(e) = state.disconnect(&id).await
        {
            warn!(channel_id = %id, "disconnect listener error: {e}");
        }
        let _ = channel.close();
        gauge.decrement(1.0);
    }

    /// Enqueues a payload toward one locally hosted channel.
    pub async fn push(&self, channel_id: &str, payload: Bytes) -> Result<()> {
        let Some(channel) = self.channels.get(channel_id) else {
            return Err(ServerError::ChannelNotFound(channel_id.to_string()).into());
        };
        channel.push(payload).await?;
        Ok(())
    }

    /// Stops accepting and closes every registered channel. Executed once;
    /// later calls return immediately.
    pub fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.quit.cancel();
        for ch in self.channels.all() {
            if let Err(e) = ch.close() {
                debug!(channel_id = %ch.id(), "close on shutdown: {e}");
            }
        }
        info!(id = %self.entry.id, "server shutdown");
    }
}
