// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use im_mesh_rs::{
    cfg::{GatewayConfig, LogicConfig, init_logger, resolve_config_path},
    gateway, logic, metrics,
    naming::{MemoryNaming, Naming},
    session::MemoryStorage,
    wire::{SN_CHAT, SN_LOGIN},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_else(|| "standalone".to_string());
    let config_path = args.next();
    let logger_path = args
        .next()
        .unwrap_or_else(|| "config/logger.yaml".to_string());

    let _logger = init_logger(&logger_path)?;
    metrics::describe();

    // The in-process registry serves single-host setups; clustered
    // deployments plug a real discovery backend through the Naming trait.
    let naming: Arc<dyn Naming> = Arc::new(MemoryNaming::new());

    match role.as_str() {
        "gateway" => {
            let path = config_path.unwrap_or_else(|| "config/gateway.yaml".to_string());
            let cfg = GatewayConfig::load_from_file(resolve_config_path(&path)?)
                .with_context(|| format!("loading {path}"))?;
            gateway::run(cfg, naming).await
        },
        "logic" => {
            let path = config_path.unwrap_or_else(|| "config/logic.yaml".to_string());
            let cfg = LogicConfig::load_from_file(resolve_config_path(&path)?)
                .with_context(|| format!("loading {path}"))?;
            logic::run(cfg, naming).await
        },
        "standalone" => run_standalone(naming).await,
        other => bail!("unknown role: {other} (expected gateway|logic|standalone)"),
    }
}

/// One process hosting a login server, a chat server and a tcp gateway,
/// glued by the in-process registry. Good enough to talk to with a client on
/// localhost.
async fn run_standalone(naming: Arc<dyn Naming>) -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let messages = logic::MemoryMessageService::new();
    let groups = logic::MemoryGroupService::new();

    for (name, port) in [(SN_LOGIN, 8100u16), (SN_CHAT, 8200u16)] {
        let mut cfg = LogicConfig {
            service_name: name.to_string(),
            listen: format!("127.0.0.1:{port}"),
            public_address: "127.0.0.1".to_string(),
            public_port: port,
            ..Default::default()
        };
        cfg.validate_and_normalize()?;

        let container = logic::build(
            &cfg,
            Arc::clone(&naming),
            Arc::clone(&storage) as _,
            Arc::clone(&messages) as _,
            Arc::clone(&groups) as _,
        )?;
        info!(service = name, port, "starting logic server");
        tokio::spawn(async move {
            if let Err(e) = container.start().await {
                tracing::error!("logic server exited: {e}");
            }
        });
    }

    let mut cfg = GatewayConfig {
        listen: "127.0.0.1:8000".to_string(),
        public_address: "127.0.0.1".to_string(),
        ..Default::default()
    };
    cfg.validate_and_normalize()?;
    info!("starting gateway on {}", cfg.listen);
    gateway::run(cfg, naming).await
}
