// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The service-mesh container: one per process, holding the local server,
//! the discovery subscription per dependency, a client pool per service
//! name, and the selector that picks a destination instance for each packet.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, ensure};
use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::{ClientOptions, Dialer, TcpClient},
    metrics::MESSAGE_OUT_FLOW_BYTES,
    naming::{Naming, ServiceEntry},
    server::Server,
    wire::{
        META_DEST_CHANNELS, META_DEST_SERVER, Protocol,
        frame::OpCode,
        pkt::{LogicPkt, MetaValue, must_read_logic_pkt},
        proto::Header,
    },
};

pub mod clients;
pub mod route;
pub mod selector;

pub use clients::ClientMap;
pub use route::{Route, RouteSelector, Zone, read_route};
pub use selector::{HashSelector, Selector, hash_code};

pub const KEY_SERVICE_STATE: &str = "service_state";
pub const STATE_YOUNG: &str = "young";
pub const STATE_ADULT: &str = "adult";

/// How long a freshly announced service stays Young (excluded from
/// forwarding) before it may receive traffic.
pub const ADULT_AGE: Duration = Duration::from_secs(10);

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

const STATE_INITIALIZED: u8 = 1;
const STATE_STARTED: u8 = 2;
const STATE_CLOSED: u8 = 3;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid container state: {0}")]
    InvalidState(u8),
    #[error("command is empty in packet")]
    EmptyCommand,
    #[error("ChannelId is empty in packet")]
    EmptyChannelId,
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("no services found for {0}")]
    NoServices(String),
    #[error("no client found")]
    NoClient,
    #[error("unexpected service protocol: {0}")]
    UnexpectedProtocol(Protocol),
    #[error("dest_server is incorrect, {0} != {1}")]
    WrongDestServer(String, String),
    #[error("dest_channels is nil")]
    MissingDestChannels,
}

pub struct Container {
    server: Arc<Server>,
    naming: Arc<dyn Naming>,
    dialer: Arc<dyn Dialer>,
    selector: Arc<dyn Selector>,
    deps: Vec<String>,
    srv_clients: dashmap::DashMap<String, Arc<ClientMap>>,
    state: AtomicU8,
    // serializes client construction so one service is dialed at most once
    build_lock: Mutex<()>,
    stop: CancellationToken,
}

impl Container {
    pub fn new(
        server: Arc<Server>,
        naming: Arc<dyn Naming>,
        dialer: Arc<dyn Dialer>,
        selector: Arc<dyn Selector>,
        deps: &[&str],
    ) -> Arc<Self> {
        let mut unique: Vec<String> = Vec::with_capacity(deps.len());
        for dep in deps {
            if !unique.iter().any(|d| d == dep) {
                unique.push((*dep).to_string());
            }
        }
        Arc::new(Self {
            server,
            naming,
            dialer,
            selector,
            deps: unique,
            srv_clients: dashmap::DashMap::new(),
            state: AtomicU8::new(STATE_INITIALIZED),
            build_lock: Mutex::new(()),
            stop: CancellationToken::new(),
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Requests a graceful stop, as a signal would.
    pub fn trigger_shutdown(&self) {
        self.stop.cancel();
    }

    /// Brings the node up and parks until a stop signal, then shuts down.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let prev = self.state.compare_exchange(
            STATE_INITIALIZED,
            STATE_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(actual) = prev {
            return Err(MeshError::InvalidState(actual).into());
        }

        // 1. local accept loop; a bind failure is fatal to startup
        let listener = self.server.bind().await?;
        let srv = Arc::clone(&self.server);
        tokio::spawn(async move {
            if let Err(e) = srv.serve(listener).await {
                warn!("server exited: {e}");
            }
        });

        // 2. one discovery pipeline per dependency
        for dep in &self.deps {
            let this = Arc::clone(self);
            let dep = dep.clone();
            tokio::spawn(async move {
                if let Err(e) = this.connect_to_service(&dep).await {
                    warn!(dep = %dep, "connectToService failed: {e}");
                }
            });
        }

        // 3. advertise ourselves when reachable from outside
        let entry = self.server.entry().clone();
        let advertised = !entry.address.is_empty() && entry.port != 0;
        if advertised && let Err(e) = self.naming.register(entry).await {
            warn!("naming register failed: {e}");
        }

        // 4. park until signalled
        self.install_signal_handlers();
        self.stop.cancelled().await;
        info!("stop requested, shutting down");
        self.shutdown().await
    }

    #[cfg(unix)]
    fn install_signal_handlers(&self) {
        use tokio::signal::unix::{SignalKind, signal};
        for kind in [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::quit(),
            SignalKind::hangup(),
        ] {
            match signal(kind) {
                Ok(mut sig) => {
                    let stop = self.stop.clone();
                    tokio::spawn(async move {
                        sig.recv().await;
                        stop.cancel();
                    });
                },
                Err(e) => warn!("signal handler install failed: {e}"),
            }
        }
    }

    #[cfg(not(unix))]
    fn install_signal_handlers(&self) {
        let stop = self.stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });
    }

    pub async fn shutdown(&self) -> Result<()> {
        let prev = self.state.compare_exchange(
            STATE_STARTED,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Err(actual) = prev {
            return Err(MeshError::InvalidState(actual).into());
        }

        let srv = Arc::clone(&self.server);
        if tokio::time::timeout(SHUTDOWN_BUDGET, async move { srv.shutdown() })
            .await
            .is_err()
        {
            warn!("server shutdown exceeded its budget");
        }

        if let Err(e) = self.naming.deregister(self.server.service_id()).await {
            warn!("deregister failed: {e}");
        }
        for dep in &self.deps {
            let _ = self.naming.unsubscribe(dep).await;
        }

        info!("container shutdown");
        Ok(())
    }

    /// Subscribes to membership changes of `service_name` and seeds the pool
    /// with the instances already online.
    async fn connect_to_service(self: &Arc<Self>, service_name: &str) -> Result<()> {
        let clients = Arc::new(ClientMap::new());
        self.srv_clients
            .insert(service_name.to_string(), Arc::clone(&clients));

        let weak = Arc::downgrade(self);
        self.naming
            .subscribe(
                service_name,
                Arc::new(move |services| {
                    let Some(container) = weak.upgrade() else {
                        return;
                    };
                    for entry in services {
                        let container = Arc::clone(&container);
                        tokio::spawn(async move {
                            if let Err(e) = container.admit_service(entry, false).await
                            {
                                warn!("admit discovered service: {e}");
                            }
                        });
                    }
                }),
            )
            .await?;

        let found = self.naming.find(service_name, &[]).await?;
        info!(service = %service_name, count = found.len(), "find service");
        for entry in found {
            if let Err(e) = self.admit_service(entry, true).await {
                warn!("admit seeded service: {e}");
            }
        }
        Ok(())
    }

    /// Builds the client for a (possibly new) member. Members arriving via
    /// subscription start Young and are promoted after [`ADULT_AGE`]; members
    /// seeded from `find` are Adults immediately.
    async fn admit_service(
        self: &Arc<Self>,
        mut entry: ServiceEntry,
        adult_now: bool,
    ) -> Result<()> {
        let Some(clients) = self.clients_of(&entry.name) else {
            return Err(MeshError::ServiceNotFound(entry.name).into());
        };
        if clients.get(&entry.id).is_some() {
            return Ok(());
        }
        info!(service = %entry, young = !adult_now, "watch for a new service");

        let state = if adult_now { STATE_ADULT } else { STATE_YOUNG };
        entry
            .meta
            .insert(KEY_SERVICE_STATE.to_string(), state.to_string());

        let built = self.build_client(&clients, entry).await?;
        if let Some(cli) = built
            && !adult_now
        {
            tokio::spawn(async move {
                tokio::time::sleep(ADULT_AGE).await;
                cli.set_meta(KEY_SERVICE_STATE, STATE_ADULT);
            });
        }
        Ok(())
    }

    async fn build_client(
        self: &Arc<Self>,
        clients: &Arc<ClientMap>,
        entry: ServiceEntry,
    ) -> Result<Option<Arc<TcpClient>>> {
        let _guard = self.build_lock.lock().await;

        // 1. drop duplicates
        if clients.get(&entry.id).is_some() {
            return Ok(None);
        }
        // 2. only tcp between services
        if entry.protocol != Protocol::Tcp {
            return Err(MeshError::UnexpectedProtocol(entry.protocol).into());
        }
        // 3. dial
        let url = entry.dial_url();
        let cli = TcpClient::new(entry, ClientOptions::default(), Arc::clone(&self.dialer));
        cli.connect(&url).await?;

        // 4. pump inbound packets toward local channels
        let container = Arc::clone(self);
        let pool = Arc::clone(clients);
        let reader = Arc::clone(&cli);
        tokio::spawn(async move {
            if let Err(e) = container.client_readloop(&reader).await {
                debug!(id = %reader.service_id(), "client readloop ended: {e}");
            }
            pool.remove(reader.service_id());
            reader.close().await;
        });

        // 5. expose to selectors
        clients.add(Arc::clone(&cli));
        Ok(Some(cli))
    }

    async fn client_readloop(&self, cli: &Arc<TcpClient>) -> Result<()> {
        info!(id = %cli.service_id(), name = %cli.service_name(), "readloop starting");
        loop {
            let frame = cli.read().await?;
            if frame.opcode != OpCode::Binary {
                continue;
            }
            let mut buf = frame.payload;
            let packet = match must_read_logic_pkt(&mut buf) {
                Ok(p) => p,
                Err(e) => {
                    info!("discarding inbound packet: {e}");
                    continue;
                },
            };
            if let Err(e) = self.push_message(packet).await {
                info!("{e}");
            }
        }
    }

    /// Validates routing fields and sends the packet to one Adult instance of
    /// the command's service, tagging the local id as the reply address.
    pub async fn forward(&self, service_name: &str, packet: &mut LogicPkt) -> Result<()> {
        ensure!(!packet.header.command.is_empty(), MeshError::EmptyCommand);
        ensure!(!packet.header.channel_id.is_empty(), MeshError::EmptyChannelId);
        self.forward_with_selector(service_name, packet, self.selector.as_ref())
            .await
    }

    pub async fn forward_with_selector(
        &self,
        service_name: &str,
        packet: &mut LogicPkt,
        selector: &dyn Selector,
    ) -> Result<()> {
        let cli = self.lookup(service_name, &packet.header, selector)?;
        packet
            .header
            .add_string_meta(META_DEST_SERVER, self.server.service_id());
        debug!(
            to = %cli.service_id(),
            command = %packet.header.command,
            "forward message"
        );
        cli.send(&packet.marshal()).await
    }

    fn lookup(
        &self,
        service_name: &str,
        header: &Header,
        selector: &dyn Selector,
    ) -> Result<Arc<TcpClient>> {
        let Some(clients) = self.clients_of(service_name) else {
            return Err(MeshError::ServiceNotFound(service_name.to_string()).into());
        };
        let srvs = clients.services(Some((KEY_SERVICE_STATE, STATE_ADULT)));
        if srvs.is_empty() {
            return Err(MeshError::NoServices(service_name.to_string()).into());
        }
        let id = selector.lookup(header, &srvs);
        clients.get(&id).ok_or_else(|| MeshError::NoClient.into())
    }

    /// Pushes a packet onto the channel of a peer mesh node hosted by the
    /// local server (gateways appear as channels on logic servers).
    pub async fn push(&self, server_id: &str, packet: &mut LogicPkt) -> Result<()> {
        packet.header.add_string_meta(META_DEST_SERVER, server_id);
        self.server.push(server_id, packet.marshal()).await
    }

    /// Fan-out of one inbound packet to the channels named in its meta.
    async fn push_message(&self, mut packet: LogicPkt) -> Result<()> {
        let dest_server = match packet.header.get_meta(META_DEST_SERVER) {
            Some(MetaValue::String(s)) => s,
            _ => String::new(),
        };
        if dest_server != self.server.service_id() {
            return Err(MeshError::WrongDestServer(
                dest_server,
                self.server.service_id().to_string(),
            )
            .into());
        }
        let channels = match packet.header.get_meta(META_DEST_CHANNELS) {
            Some(MetaValue::String(s)) => s,
            _ => return Err(MeshError::MissingDestChannels.into()),
        };

        packet.header.del_meta(META_DEST_SERVER);
        packet.header.del_meta(META_DEST_CHANNELS);
        let payload = packet.marshal();
        debug!(
            channels = %channels,
            command = %packet.header.command,
            "pushing message"
        );

        for channel in channels.split(',') {
            counter!(
                MESSAGE_OUT_FLOW_BYTES,
                "command" => packet.header.command.clone()
            )
            .increment(payload.len() as u64);
            if let Err(e) = self.server.push(channel, payload.clone()).await {
                info!(channel = %channel, "push failed: {e}");
            }
        }
        Ok(())
    }

    fn clients_of(&self, service_name: &str) -> Option<Arc<ClientMap>> {
        self.srv_clients
            .get(service_name)
            .map(|e| Arc::clone(e.value()))
    }
}
