// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The gateway-side abstraction of one client connection: a single read loop,
//! a single write loop, and a bounded outbound queue between callers and the
//! wire.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    transport::{Conn, ConnReader, ConnWriter},
    wire::{DEFAULT_READWAIT, DEFAULT_WRITEWAIT, frame::OpCode},
    workers::WorkerPool,
};

pub mod map;

pub use map::ChannelMap;

/// Free-form key/values attached to a channel at accept time (`app`,
/// `account`, ...).
pub type Meta = HashMap<String, String>;

/// Outbound queue capacity. Deliberately tiny: a full queue parks producers,
/// propagating backpressure instead of buffering without bound.
pub const OUTBOUND_QUEUE: usize = 5;

const STATE_INIT: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_CLOSED: u8 = 2;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel has started")]
    AlreadyStarted,
    #[error("channel {0} has closed")]
    Closed(String),
    #[error("channel state not started")]
    NotStarted,
    #[error("remote side close the channel")]
    RemoteClosed,
    #[error("read timeout on channel {0}")]
    ReadTimeout(String),
}

/// Callback invoked for every non-empty payload a channel reads.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn receive(&self, agent: Arc<Channel>, payload: Bytes);
}

enum Outbound {
    Payload(Bytes),
    Pong(Bytes),
}

pub struct Channel {
    id: String,
    meta: Meta,
    outbound: mpsc::Sender<Outbound>,
    state: AtomicU8,
    readwait_ms: AtomicU64,
    writewait_ms: AtomicU64,
    reader: Mutex<Option<ConnReader>>,
    closed: CancellationToken,
    gpool: WorkerPool,
}

impl Channel {
    /// Splits the connection and spawns the write loop. The returned channel
    /// is in `Init` state until [`Channel::readloop`] starts it.
    pub fn new(id: String, meta: Meta, conn: Conn, gpool: WorkerPool) -> Arc<Self> {
        let (rd, wr) = conn.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

        let ch = Arc::new(Self {
            id,
            meta,
            outbound: tx,
            state: AtomicU8::new(STATE_INIT),
            readwait_ms: AtomicU64::new(DEFAULT_READWAIT.as_millis() as u64),
            writewait_ms: AtomicU64::new(DEFAULT_WRITEWAIT.as_millis() as u64),
            reader: Mutex::new(Some(rd)),
            closed: CancellationToken::new(),
            gpool,
        });

        let writer = Arc::clone(&ch);
        tokio::spawn(async move {
            if let Err(e) = writer.write_loop(wr, rx).await {
                debug!(id = %writer.id, "channel writeloop ended: {e}");
            }
        });

        ch
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Enqueues a payload for the write loop. Parks the caller while the
    /// queue is full; fails once the channel left the `Started` state.
    pub async fn push(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.state.load(Ordering::Acquire) != STATE_STARTED {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        self.outbound
            .send(Outbound::Payload(payload))
            .await
            .map_err(|_| ChannelError::Closed(self.id.clone()))
    }

    /// Started → Closed, exactly once. The write loop drains what is already
    /// queued, flushes and exits; later pushes fail.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self
            .state
            .compare_exchange(
                STATE_STARTED,
                STATE_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ChannelError::NotStarted);
        }
        self.closed.cancel();
        Ok(())
    }

    /// Runs the read loop until the peer closes, a deadline expires or the
    /// listener pool rejects a submission. Only one call ever succeeds.
    pub async fn readloop(
        self: &Arc<Self>,
        listener: Arc<dyn MessageListener>,
    ) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_INIT,
                STATE_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ChannelError::AlreadyStarted.into());
        }

        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .context("channel reader already taken")?;

        loop {
            let frame = match timeout(self.readwait(), reader.read_frame()).await {
                Ok(res) => res?,
                Err(_) => return Err(ChannelError::ReadTimeout(self.id.clone()).into()),
            };

            match frame.opcode {
                OpCode::Close => return Err(ChannelError::RemoteClosed.into()),
                OpCode::Ping => {
                    trace!(id = %self.id, "receive a ping, respond with a pong");
                    self.outbound
                        .send(Outbound::Pong(frame.payload))
                        .await
                        .map_err(|_| ChannelError::Closed(self.id.clone()))?;
                    continue;
                },
                _ => {},
            }

            if frame.payload.is_empty() {
                continue;
            }

            let agent = Arc::clone(self);
            let lst = Arc::clone(&listener);
            let payload = frame.payload;
            self.gpool
                .submit(async move {
                    lst.receive(agent, payload).await;
                })
                .await?;
        }
    }

    /// Zero keeps the current value.
    pub fn set_readwait(&self, timeout: Duration) {
        if !timeout.is_zero() {
            self.readwait_ms
                .store(timeout.as_millis() as u64, Ordering::Relaxed);
        }
    }

    /// Zero keeps the current value.
    pub fn set_writewait(&self, timeout: Duration) {
        if !timeout.is_zero() {
            self.writewait_ms
                .store(timeout.as_millis() as u64, Ordering::Relaxed);
        }
    }

    fn readwait(&self) -> Duration {
        Duration::from_millis(self.readwait_ms.load(Ordering::Relaxed))
    }

    fn writewait(&self) -> Duration {
        Duration::from_millis(self.writewait_ms.load(Ordering::Relaxed))
    }

    async fn write_loop(
        &self,
        mut wr: ConnWriter,
        mut rx: mpsc::Receiver<Outbound>,
    ) -> Result<()> {
        loop {
            let item = tokio::select! {
                _ = self.closed.cancelled() => None,
                it = rx.recv() => it,
            };

            let Some(first) = item else {
                // closed: deliver everything already enqueued, then stop
                while let Ok(rest) = rx.try_recv() {
                    self.write_one(&mut wr, rest).await?;
                }
                wr.flush().await?;
                debug!(id = %self.id, "channel writeloop exited");
                return Ok(());
            };

            // burst: one flush for everything currently queued
            self.write_one(&mut wr, first).await?;
            while let Ok(next) = rx.try_recv() {
                self.write_one(&mut wr, next).await?;
            }
            wr.flush().await?;
        }
    }

    async fn write_one(&self, wr: &mut ConnWriter, out: Outbound) -> Result<()> {
        let (opcode, payload) = match &out {
            Outbound::Payload(b) => (OpCode::Binary, b),
            Outbound::Pong(b) => (OpCode::Pong, b),
        };
        timeout(self.writewait(), wr.write_frame(opcode, payload))
            .await
            .map_err(|_| anyhow::anyhow!("write timeout on channel {}", self.id))?
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
