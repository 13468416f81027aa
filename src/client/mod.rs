// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A persistent outbound link from one mesh node to one discovered service.
//! The dialer performs the inner handshake; afterwards the client pings the
//! peer every heartbeat interval and expects traffic (or pongs) within the
//! read-wait window.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    naming::ServiceEntry,
    transport::{ConnReader, ConnWriter, TcpConn},
    wire::{
        DEFAULT_HEARTBEAT, DEFAULT_LOGINWAIT, DEFAULT_READWAIT, DEFAULT_WRITEWAIT,
        frame::{Frame, OpCode},
    },
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client state")]
    InvalidState,
    #[error("connection is nil")]
    NotConnected,
    #[error("remote side close the channel")]
    RemoteClosed,
    #[error("{0} timeout")]
    Timeout(&'static str),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub heartbeat: Duration,
    pub readwait: Duration,
    pub writewait: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            readwait: DEFAULT_READWAIT,
            writewait: DEFAULT_WRITEWAIT,
        }
    }
}

/// Everything a dialer needs to reach and introduce itself to a peer.
pub struct DialerContext {
    pub id: String,
    pub name: String,
    pub address: String,
    pub timeout: Duration,
}

/// Dials the raw connection and performs the protocol-specific handshake.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<TcpStream>;
}

const STATE_IDLE: u8 = 0;
const STATE_CONNECTED: u8 = 1;

pub struct TcpClient {
    entry: ServiceEntry,
    meta: DashMap<String, String>,
    options: ClientOptions,
    dialer: Arc<dyn Dialer>,
    state: AtomicU8,
    reader: Mutex<Option<ConnReader>>,
    writer: Mutex<Option<ConnWriter>>,
    closed: CancellationToken,
    close_done: AtomicBool,
}

impl TcpClient {
    pub fn new(
        entry: ServiceEntry,
        options: ClientOptions,
        dialer: Arc<dyn Dialer>,
    ) -> Arc<Self> {
        let meta = DashMap::new();
        for (k, v) in &entry.meta {
            meta.insert(k.clone(), v.clone());
        }
        Arc::new(Self {
            entry,
            meta,
            options,
            dialer,
            state: AtomicU8::new(STATE_IDLE),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed: CancellationToken::new(),
            close_done: AtomicBool::new(false),
        })
    }

    pub fn service_id(&self) -> &str {
        &self.entry.id
    }

    pub fn service_name(&self) -> &str {
        &self.entry.name
    }

    /// Identity snapshot with the live meta overlay (discovery state flags
    /// mutate after construction).
    pub fn service(&self) -> ServiceEntry {
        let mut entry = self.entry.clone();
        entry.meta = self
            .meta
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entry
    }

    pub fn set_meta(&self, key: &str, value: &str) {
        self.meta.insert(key.to_string(), value.to_string());
    }

    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.meta.get(key).map(|e| e.value().clone())
    }

    /// Dials and handshakes, then spawns the heartbeat task. One successful
    /// connect per client; reconnection is a new client.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_CONNECTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ClientError::InvalidState.into());
        }

        let ctx = DialerContext {
            id: self.entry.id.clone(),
            name: self.entry.name.clone(),
            address: addr.to_string(),
            timeout: DEFAULT_LOGINWAIT,
        };
        let stream = match self.dialer.dial_and_handshake(ctx).await {
            Ok(s) => s,
            Err(e) => {
                self.state.store(STATE_IDLE, Ordering::Release);
                return Err(e);
            },
        };

        let (rd, wr) = TcpConn::new(stream)?.split();
        *self.reader.lock().await = Some(ConnReader::Tcp(rd));
        *self.writer.lock().await = Some(ConnWriter::Tcp(wr));

        if !self.options.heartbeat.is_zero() {
            let cli = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = cli.heartbeat_loop().await {
                    warn!(id = %cli.entry.id, "heartbeatloop stopped: {e}");
                }
            });
        }

        Ok(())
    }

    /// Reads one frame, refreshing the read deadline when heartbeats are on.
    /// A Close frame surfaces as an error so the caller tears the link down.
    pub async fn read(&self) -> Result<Frame> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let frame = if self.options.heartbeat.is_zero() {
            reader.read_frame().await?
        } else {
            timeout(self.options.readwait, reader.read_frame())
                .await
                .map_err(|_| ClientError::Timeout("read"))??
        };

        if frame.opcode == OpCode::Close {
            return Err(ClientError::RemoteClosed.into());
        }
        Ok(frame)
    }

    /// Writes one Binary frame and flushes.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.state.load(Ordering::Acquire) != STATE_CONNECTED {
            return Err(ClientError::NotConnected.into());
        }
        self.write(OpCode::Binary, payload).await
    }

    async fn write(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        timeout(self.options.writewait, async {
            writer.write_frame(opcode, payload).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| ClientError::Timeout("write"))??;
        Ok(())
    }

    async fn heartbeat_loop(self: &Arc<Self>) -> Result<()> {
        let mut tick = tokio::time::interval(self.options.heartbeat);
        tick.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = self.closed.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    debug!(id = %self.entry.id, "send ping to server");
                    self.write(OpCode::Ping, &[]).await?;
                },
            }
        }
    }

    /// Sends a Close frame best-effort and stops the heartbeat. Idempotent.
    pub async fn close(&self) {
        if self.close_done.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.state.load(Ordering::Acquire) == STATE_CONNECTED {
            let _ = self.write(OpCode::Close, &[]).await;
        }
        self.closed.cancel();
        self.state.store(STATE_IDLE, Ordering::Release);
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CONNECTED
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("id", &self.entry.id)
            .field("name", &self.entry.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
