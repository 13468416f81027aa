// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process cluster harness: two logic servers (login, chat) and one tcp
//! gateway glued by the in-memory registry, plus a minimal wire-level client.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use im_mesh_rs::{
    cfg::{GatewayConfig, LogicConfig},
    gateway,
    logic::{self, MemoryGroupService, MemoryMessageService},
    mesh::Container,
    naming::{MemoryNaming, Naming},
    session::MemoryStorage,
    token::{self, Token},
    wire::{
        COMMAND_LOGIN_SIGNIN, SN_CHAT, SN_LOGIN,
        frame::{self, Frame, OpCode},
        pkt::{BasicPkt, LogicPkt, must_read_basic_pkt, must_read_logic_pkt},
        proto::{LoginReq, LoginResp, Status},
    },
};
use tokio::{
    net::TcpStream,
    time::{sleep, timeout},
};

pub struct Cluster {
    pub naming: Arc<MemoryNaming>,
    pub storage: Arc<MemoryStorage>,
    pub messages: Arc<MemoryMessageService>,
    pub groups: Arc<MemoryGroupService>,
    pub gateway_addr: String,
    pub gateway_id: String,
    // keep the containers alive for the duration of the test
    containers: Vec<Arc<Container>>,
}

impl Cluster {
    pub fn shutdown(&self) {
        for c in &self.containers {
            c.trigger_shutdown();
        }
    }
}

/// Boots login/chat logic servers on `base+1`/`base+2` and a gateway on
/// `base`, all sharing one registry and one session store.
pub async fn start_cluster(base: u16) -> Result<Cluster> {
    let naming = Arc::new(MemoryNaming::new());
    let storage = Arc::new(MemoryStorage::new());
    let messages = MemoryMessageService::new();
    let groups = MemoryGroupService::new();
    let mut containers = Vec::new();

    for (name, port) in [(SN_LOGIN, base + 1), (SN_CHAT, base + 2)] {
        let mut cfg = LogicConfig {
            service_id: format!("{name}{port}"),
            service_name: name.to_string(),
            listen: format!("127.0.0.1:{port}"),
            public_address: "127.0.0.1".to_string(),
            public_port: port,
            ..Default::default()
        };
        cfg.validate_and_normalize()?;

        let container = logic::build(
            &cfg,
            Arc::clone(&naming) as Arc<dyn Naming>,
            Arc::clone(&storage) as _,
            Arc::clone(&messages) as _,
            Arc::clone(&groups) as _,
        )?;
        containers.push(Arc::clone(&container));
        tokio::spawn(async move {
            let _ = container.start().await;
        });
    }

    // the gateway must seed its client pool via find() so the logic servers
    // are Adults immediately; wait until both are registered
    wait_until(Duration::from_secs(5), || {
        let naming = Arc::clone(&naming);
        async move {
            Ok(naming.find(SN_LOGIN, &[]).await?.len() == 1
                && naming.find(SN_CHAT, &[]).await?.len() == 1)
        }
    })
    .await
    .context("logic servers did not register")?;

    let gateway_id = format!("gw{base}");
    let mut cfg = GatewayConfig {
        service_id: gateway_id.clone(),
        listen: format!("127.0.0.1:{base}"),
        public_address: "127.0.0.1".to_string(),
        public_port: base,
        ..Default::default()
    };
    cfg.validate_and_normalize()?;

    let container = gateway::build(&cfg, Arc::clone(&naming) as Arc<dyn Naming>)?;
    containers.push(Arc::clone(&container));
    tokio::spawn(async move {
        let _ = container.start().await;
    });

    Ok(Cluster {
        naming,
        storage,
        messages,
        groups,
        gateway_addr: format!("127.0.0.1:{base}"),
        gateway_id,
        containers,
    })
}

pub async fn wait_until<F, Fut>(budget: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if probe().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached within {budget:?}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// A bare wire-protocol client speaking the framed TCP transport.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self { stream: TcpStream::connect(addr).await? })
    }

    pub async fn send_pkt(&mut self, pkt: &LogicPkt) -> Result<()> {
        frame::write_frame(&mut self.stream, OpCode::Binary, &pkt.marshal()).await?;
        Ok(())
    }

    pub async fn send_basic(&mut self, pkt: &BasicPkt) -> Result<()> {
        frame::write_frame(&mut self.stream, OpCode::Binary, &pkt.marshal()).await?;
        Ok(())
    }

    pub async fn send_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        frame::write_frame(&mut self.stream, opcode, payload).await?;
        Ok(())
    }

    pub async fn read_frame(&mut self, wait: Duration) -> Result<Frame> {
        Ok(timeout(wait, frame::read_frame(&mut self.stream)).await??)
    }

    /// Reads the next Binary frame and decodes it as a logic packet. A Close
    /// frame surfaces as an error carrying the peer's reason.
    pub async fn read_logic(&mut self, wait: Duration) -> Result<LogicPkt> {
        let frame = self.read_frame(wait).await?;
        if frame.opcode == OpCode::Close {
            bail!("closed by peer: {}", String::from_utf8_lossy(&frame.payload));
        }
        let mut buf = frame.payload;
        Ok(must_read_logic_pkt(&mut buf)?)
    }

    pub async fn read_basic(&mut self, wait: Duration) -> Result<BasicPkt> {
        let frame = self.read_frame(wait).await?;
        let mut buf = frame.payload;
        Ok(must_read_basic_pkt(&mut buf)?)
    }
}

pub fn mint_token(account: &str) -> Result<String> {
    let token = Token::new(account, "im", chrono::Utc::now().timestamp() + 3600);
    Ok(token::generate(token::DEFAULT_SECRET, &token)?)
}

/// Connects and signs in, retrying while the gateway's mesh links warm up.
/// Returns the client plus the channel id assigned by the gateway.
pub async fn login(addr: &str, account: &str) -> Result<(TestClient, String)> {
    let signed = mint_token(account)?;

    for _ in 0..25 {
        let Ok(mut client) = TestClient::connect(addr).await else {
            sleep(Duration::from_millis(200)).await;
            continue;
        };

        let mut signin = LogicPkt::new(COMMAND_LOGIN_SIGNIN);
        signin.write_body(&LoginReq { token: signed.clone(), tags: vec![] });
        if client.send_pkt(&signin).await.is_err() {
            sleep(Duration::from_millis(200)).await;
            continue;
        }

        match client.read_logic(Duration::from_secs(2)).await {
            Ok(resp) if resp.header.status() == Status::Success => {
                let body: LoginResp = resp.read_body()?;
                return Ok((client, body.channel_id));
            },
            Ok(resp) => bail!("login rejected: {:?}", resp.header.status()),
            Err(_) => {
                // gateway not meshed yet, or the response lost the race with
                // channel registration
                sleep(Duration::from_millis(200)).await;
            },
        }
    }
    bail!("login did not succeed against {addr}")
}
